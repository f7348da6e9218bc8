//! Script to physically delete expired enrichment cache rows.

use dotenvy::dotenv;
use lead_enrich_api::cache::CacheStore;
use lead_enrich_api::circuit_breaker::create_db_circuit_breaker;
use lead_enrich_api::db_storage::PgCacheStore;
use sqlx::postgres::PgPoolOptions;
use std::env;

/// Main entry point for the sweep.
///
/// Expired rows are already invisible to lookups; this reclaims their space.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let database_url = env::var("DB_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DB_URL or DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database. Purging expired cache entries...");

    let store = PgCacheStore::new(pool, create_db_circuit_breaker());
    let now = chrono::Utc::now();
    let purged = store.purge_expired(now).await?;
    let stats = store.stats(now).await?;

    tracing::info!(
        "Purge complete. Deleted {} expired rows, {} live entries remain ({:.2} MB).",
        purged,
        stats.total_entries,
        stats.cache_size_mb
    );

    Ok(())
}
