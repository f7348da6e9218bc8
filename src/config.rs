use crate::cache::{DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Base URL of the raw-record store.
    pub data_lake_url: String,
    pub data_lake_token: Option<String>,
    pub cache_ttl_seconds: u64,
    /// Deadline for each source adapter call.
    pub adapter_timeout_ms: u64,
    /// Path prefix of the API routes (`v1`).
    pub api_version: String,
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid positive number", name)),
        _ => Ok(default),
    }
}

fn check_cache_ttl(ttl_seconds: u64) -> anyhow::Result<()> {
    if ttl_seconds == 0 || ttl_seconds > MAX_TTL_SECONDS {
        anyhow::bail!(
            "CACHE_TTL_SECONDS must be between 1 and {}",
            MAX_TTL_SECONDS
        );
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            data_lake_url: std::env::var("DATA_LAKE_URL")
                .map_err(|_| anyhow::anyhow!("DATA_LAKE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATA_LAKE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("DATA_LAKE_URL must start with http:// or https://");
                    }
                    Ok(url.trim_end_matches('/').to_string())
                })?,
            data_lake_token: std::env::var("DATA_LAKE_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            cache_ttl_seconds: parse_or("CACHE_TTL_SECONDS", DEFAULT_TTL_SECONDS)?,
            adapter_timeout_ms: parse_or("ADAPTER_TIMEOUT_MS", 5_000)?,
            api_version: std::env::var("API_VERSION")
                .ok()
                .map(|v| v.trim().trim_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "v1".to_string()),
        };

        check_cache_ttl(config.cache_ttl_seconds)?;

        if config.adapter_timeout_ms == 0 {
            anyhow::bail!("ADAPTER_TIMEOUT_MS must be greater than zero");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Data lake URL: {}", config.data_lake_url);
        if config.data_lake_token.is_some() {
            tracing::debug!("Data lake token configured");
        }
        tracing::debug!(
            "Cache TTL: {}s, adapter timeout: {}ms",
            config.cache_ttl_seconds,
            config.adapter_timeout_ms
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_ttl_bounds() {
        assert!(check_cache_ttl(DEFAULT_TTL_SECONDS).is_ok());
        assert!(check_cache_ttl(MAX_TTL_SECONDS).is_ok());
        assert!(check_cache_ttl(0).is_err());
        assert!(check_cache_ttl(MAX_TTL_SECONDS + 1).is_err());
        assert!(check_cache_ttl(100_000_000_000_000).is_err());
    }
}
