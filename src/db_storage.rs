//! Postgres implementations of the cache and account stores.
//!
//! Every query runs through the shared database circuit breaker.

use crate::accounts::AccountStore;
use crate::cache::{CacheEntry, CacheStore};
use crate::cache_validator::SealedPayload;
use crate::circuit_breaker::{guarded, DbCircuitBreaker};
use crate::errors::AppError;
use crate::models::{ApiKey, CacheStats, DataSource, EntityKind, SourceHealth, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct CacheRow {
    id: Uuid,
    kind: String,
    input_key: String,
    enriched_data: String,
    checksum: String,
    confidence_score: f64,
    data_sources: Json<Vec<DataSource>>,
    company_domain: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: i64,
    last_accessed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = AppError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "person" => EntityKind::Person,
            "company" => EntityKind::Company,
            other => {
                return Err(AppError::InternalError(format!(
                    "Unknown cache entry kind '{}'",
                    other
                )))
            }
        };

        Ok(CacheEntry {
            id: row.id,
            kind,
            input_key: row.input_key,
            payload: SealedPayload {
                data: row.enriched_data,
                checksum: row.checksum,
            },
            confidence_score: row.confidence_score,
            data_sources: row.data_sources.0,
            company_domain: row.company_domain,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            hit_count: row.hit_count,
            last_accessed_at: row.last_accessed_at,
        })
    }
}

/// Cache rows in `enrichment_cache`.
pub struct PgCacheStore {
    pool: PgPool,
    breaker: DbCircuitBreaker,
}

impl PgCacheStore {
    pub fn new(pool: PgPool, breaker: DbCircuitBreaker) -> Self {
        Self { pool, breaker }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn insert(&self, entry: CacheEntry) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "insert cache entry",
            sqlx::query(
                r#"
                INSERT INTO enrichment_cache (
                    id, kind, input_key, enriched_data, checksum, confidence_score,
                    data_sources, company_domain, created_at, updated_at, expires_at,
                    hit_count, last_accessed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(entry.id)
            .bind(entry.kind.as_str())
            .bind(&entry.input_key)
            .bind(&entry.payload.data)
            .bind(&entry.payload.checksum)
            .bind(entry.confidence_score)
            .bind(Json(&entry.data_sources))
            .bind(&entry.company_domain)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .bind(entry.expires_at)
            .bind(entry.hit_count)
            .bind(entry.last_accessed_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_live(
        &self,
        kind: EntityKind,
        input_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, AppError> {
        let row = guarded(
            &self.breaker,
            "find cache entry",
            sqlx::query_as::<_, CacheRow>(
                r#"
                SELECT * FROM enrichment_cache
                WHERE kind = $1 AND input_key = $2 AND expires_at > $3
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(kind.as_str())
            .bind(input_key)
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn record_hit(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "record cache hit",
            sqlx::query(
                "UPDATE enrichment_cache SET hit_count = hit_count + 1, last_accessed_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn invalidate(&self, kind: EntityKind, input_key: &str) -> Result<u64, AppError> {
        let result = guarded(
            &self.breaker,
            "invalidate cache entry",
            sqlx::query("DELETE FROM enrichment_cache WHERE kind = $1 AND input_key = $2")
                .bind(kind.as_str())
                .bind(input_key)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    async fn search_by_domain(
        &self,
        domain: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, AppError> {
        let rows = guarded(
            &self.breaker,
            "search cache by domain",
            sqlx::query_as::<_, CacheRow>(
                r#"
                SELECT * FROM enrichment_cache
                WHERE kind = 'person' AND company_domain = $1 AND expires_at > $2
                ORDER BY confidence_score DESC, updated_at DESC
                LIMIT $3
                "#,
            )
            .bind(domain)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter().map(CacheEntry::try_from).collect()
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError> {
        guarded(
            &self.breaker,
            "cache stats",
            sqlx::query_as::<_, CacheStats>(
                r#"
                SELECT
                    COUNT(*)::BIGINT AS total_entries,
                    COALESCE(SUM(hit_count), 0)::BIGINT AS total_hits,
                    COALESCE(AVG(confidence_score), 0)::DOUBLE PRECISION AS avg_confidence,
                    (COALESCE(SUM(OCTET_LENGTH(enriched_data)), 0) / 1048576.0)::DOUBLE PRECISION
                        AS cache_size_mb
                FROM enrichment_cache
                WHERE expires_at > $1
                "#,
            )
            .bind(now)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = guarded(
            &self.breaker,
            "purge expired cache entries",
            sqlx::query("DELETE FROM enrichment_cache WHERE expires_at <= $1")
                .bind(now)
                .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

/// API keys, usage log and source health.
pub struct PgAccountStore {
    pool: PgPool,
    breaker: DbCircuitBreaker,
}

impl PgAccountStore {
    pub fn new(pool: PgPool, breaker: DbCircuitBreaker) -> Self {
        Self { pool, breaker }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        guarded(
            &self.breaker,
            "find api key",
            sqlx::query_as::<_, ApiKey>(
                "SELECT * FROM api_keys WHERE key_hash = $1 AND revoked = FALSE",
            )
            .bind(key_hash)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn touch_last_used(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "touch api key",
            sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn add_credits_used(&self, id: Uuid, credits: i32) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "charge credits",
            sqlx::query("UPDATE api_keys SET credits_used = credits_used + $2 WHERE id = $1")
                .bind(id)
                .bind(credits)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn reset_credits(
        &self,
        id: Uuid,
        next_reset_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "reset credits",
            sqlx::query(
                "UPDATE api_keys SET credits_used = 0, credits_reset_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(next_reset_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn log_usage(&self, record: UsageRecord) -> Result<(), AppError> {
        guarded(
            &self.breaker,
            "log usage",
            sqlx::query(
                r#"
                INSERT INTO usage_logs (
                    api_key_id, user_id, endpoint, method, request_id, response_status,
                    response_time_ms, credits_used, cache_hit, confidence_score,
                    data_sources, error_message
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(record.api_key_id)
            .bind(record.user_id)
            .bind(&record.endpoint)
            .bind(&record.method)
            .bind(record.request_id)
            .bind(i32::from(record.response_status))
            .bind(record.response_time_ms)
            .bind(record.credits_used)
            .bind(record.cache_hit)
            .bind(record.confidence_score)
            .bind(Json(&record.data_sources))
            .bind(&record.error_message)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn data_source_health(&self) -> Result<Vec<SourceHealth>, AppError> {
        guarded(
            &self.breaker,
            "load source health",
            sqlx::query_as::<_, SourceHealth>(
                "SELECT source, status, last_update, records FROM data_source_health ORDER BY source",
            )
            .fetch_all(&self.pool),
        )
        .await
    }
}
