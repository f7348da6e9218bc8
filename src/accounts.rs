//! API key accounts: authentication, credit bookkeeping and usage logging.

use crate::errors::AppError;
use crate::models::{ApiKey, SourceHealth, UsageRecord};
use crate::obs;
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use uuid::Uuid;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api_(live|test)_[a-zA-Z0-9]{32}$").expect("api key regex is valid")
});

const KEY_PREFIX_LEN: usize = 13;

pub fn is_valid_api_key_format(key: &str) -> bool {
    API_KEY_RE.is_match(key)
}

/// SHA-256 of the raw key, hex encoded. Only this hash is stored.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Loggable prefix of a key (`api_live_xxxx`).
pub fn key_prefix(key: &str) -> String {
    key.chars().take(KEY_PREFIX_LEN).collect()
}

/// Builds a key record for `raw_key` with a fresh monthly credit cycle.
pub fn new_api_key(
    raw_key: &str,
    tier: &str,
    rate_limit_rpm: i32,
    rate_limit_rpd: i32,
    credits_limit: i32,
    now: DateTime<Utc>,
) -> ApiKey {
    ApiKey {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        key_hash: hash_api_key(raw_key),
        key_prefix: key_prefix(raw_key),
        tier: tier.to_string(),
        rate_limit_rpm,
        rate_limit_rpd,
        credits_limit,
        credits_used: 0,
        credits_reset_at: now.checked_add_months(Months::new(1)).unwrap_or(now),
        created_at: now,
        last_used_at: None,
        expires_at: None,
        revoked: false,
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Non-revoked key with this hash.
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError>;

    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError>;

    async fn add_credits_used(&self, id: Uuid, credits: i32) -> Result<(), AppError>;

    /// Zeroes `credits_used` and moves the reset date.
    async fn reset_credits(&self, id: Uuid, next_reset_at: DateTime<Utc>)
        -> Result<(), AppError>;

    async fn log_usage(&self, record: UsageRecord) -> Result<(), AppError>;

    async fn data_source_health(&self) -> Result<Vec<SourceHealth>, AppError>;
}

/// Resolves the `Authorization` header to an active API key.
///
/// Rejections happen before any enrichment work. `last_used_at` is touched
/// in the background.
pub async fn authenticate(
    store: &Arc<dyn AccountStore>,
    authorization: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ApiKey, AppError> {
    let header = authorization
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    if scheme != "Bearer" {
        return Err(AppError::Unauthorized(
            "Invalid authentication scheme".to_string(),
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized("Missing API key".to_string()));
    }
    if !is_valid_api_key_format(token) {
        return Err(AppError::Unauthorized(
            "Invalid API key format. Expected: api_live_xxx or api_test_xxx".to_string(),
        ));
    }

    let api_key = store
        .find_by_hash(&hash_api_key(token))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid or revoked API key".to_string()))?;

    if let Some(expires_at) = api_key.expires_at {
        if expires_at < now {
            return Err(AppError::Unauthorized(format!(
                "API key has expired (expired on {})",
                expires_at.to_rfc3339()
            )));
        }
    }

    tracing::debug!("Authenticated key {} (tier {})", api_key.key_prefix, api_key.tier);

    let store = Arc::clone(store);
    let id = api_key.id;
    obs::spawn_best_effort("touch last_used_at", async move {
        store.touch_last_used(id, now).await
    });

    Ok(api_key)
}

/// In-process account store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    keys: RwLock<HashMap<Uuid, ApiKey>>,
    usage: RwLock<Vec<UsageRecord>>,
    health: RwLock<Vec<SourceHealth>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_key(&self, key: ApiKey) {
        self.keys.write().await.insert(key.id, key);
    }

    pub async fn key(&self, id: Uuid) -> Option<ApiKey> {
        self.keys.read().await.get(&id).cloned()
    }

    pub async fn usage(&self) -> Vec<UsageRecord> {
        self.usage.read().await.clone()
    }

    pub async fn set_health(&self, health: Vec<SourceHealth>) {
        *self.health.write().await = health;
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .find(|k| k.key_hash == key_hash && !k.revoked)
            .cloned())
    }

    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(key) = self.keys.write().await.get_mut(&id) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }

    async fn add_credits_used(&self, id: Uuid, credits: i32) -> Result<(), AppError> {
        match self.keys.write().await.get_mut(&id) {
            Some(key) => {
                key.credits_used += credits;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("API key {}", id))),
        }
    }

    async fn reset_credits(
        &self,
        id: Uuid,
        next_reset_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(key) = self.keys.write().await.get_mut(&id) {
            key.credits_used = 0;
            key.credits_reset_at = next_reset_at;
        }
        Ok(())
    }

    async fn log_usage(&self, record: UsageRecord) -> Result<(), AppError> {
        self.usage.write().await.push(record);
        Ok(())
    }

    async fn data_source_health(&self) -> Result<Vec<SourceHealth>, AppError> {
        Ok(self.health.read().await.clone())
    }
}
