//! TTL-bounded cache of previously computed entities.
//!
//! Every write inserts a fresh row; a lookup returns the newest row whose
//! `expires_at` is still in the future. Expired rows are logically deleted
//! and physically reaped by [`EnrichmentCache::purge_expired`].

use crate::cache_validator::SealedPayload;
use crate::errors::AppError;
use crate::models::{CacheStats, DataSource, EnrichedCompany, EnrichedPerson, EntityKind};
use crate::obs;
use crate::validation::normalize_domain;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Seven days.
pub const DEFAULT_TTL_SECONDS: u64 = 604_800;
/// One year.
pub const MAX_TTL_SECONDS: u64 = 31_536_000;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Derives the cache key by precedence email > handle > domain.
///
/// Calling this with no identifier is a caller bug and is rejected.
pub fn cache_key(
    email: Option<&str>,
    handle: Option<&str>,
    domain: Option<&str>,
) -> Result<String, AppError> {
    if let Some(email) = email {
        return Ok(format!("email:{}", email.trim().to_lowercase()));
    }
    if let Some(handle) = handle {
        return Ok(format!("handle:{}", handle.trim().to_lowercase()));
    }
    if let Some(domain) = domain {
        return Ok(format!("domain:{}", normalize_domain(domain)));
    }

    Err(AppError::BadRequest(
        "An email, handle, or domain is required to derive a cache key".to_string(),
    ))
}

/// One stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: Uuid,
    pub kind: EntityKind,
    pub input_key: String,
    pub payload: SealedPayload,
    pub confidence_score: f64,
    pub data_sources: Vec<DataSource>,
    /// Company domain the entity is linked to, for domain search.
    pub company_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Storage behind [`EnrichmentCache`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn insert(&self, entry: CacheEntry) -> Result<(), AppError>;

    /// Newest unexpired row for `(kind, input_key)`.
    async fn find_live(
        &self,
        kind: EntityKind,
        input_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, AppError>;

    async fn record_hit(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError>;

    /// Deletes every row for `(kind, input_key)`, returning the count.
    async fn invalidate(&self, kind: EntityKind, input_key: &str) -> Result<u64, AppError>;

    /// Live person rows linked to `domain`, best confidence first.
    async fn search_by_domain(
        &self,
        domain: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, AppError>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError>;

    /// Physically deletes expired rows, returning the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Entities that can be cached.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn confidence_score(&self) -> f64;
    fn data_sources(&self) -> &[DataSource];
    fn company_domain(&self) -> Option<String>;
}

impl Cacheable for EnrichedPerson {
    const KIND: EntityKind = EntityKind::Person;

    fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    fn company_domain(&self) -> Option<String> {
        self.company.as_ref().map(|c| normalize_domain(&c.domain))
    }
}

impl Cacheable for EnrichedCompany {
    const KIND: EntityKind = EntityKind::Company;

    fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    fn company_domain(&self) -> Option<String> {
        Some(self.domain.clone())
    }
}

/// Typed cache facade over a [`CacheStore`].
#[derive(Clone)]
pub struct EnrichmentCache {
    store: Arc<dyn CacheStore>,
    ttl_seconds: u64,
}

impl EnrichmentCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Returns the cached entity for `key`, if a valid live row exists.
    ///
    /// Read failures and corrupted payloads are misses. On a hit the hit
    /// counter is bumped in the background.
    pub async fn get<T: Cacheable>(&self, key: &str) -> Option<T> {
        let key = key.to_lowercase();
        let entry = match self.store.find_live(T::KIND, &key, Utc::now()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("Cache miss: {} {}", T::KIND.as_str(), key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache read failed for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        let entity = entry.payload.open::<T>()?;
        tracing::debug!("Cache hit: {} {} (hits: {})", T::KIND.as_str(), key, entry.hit_count);

        let store = Arc::clone(&self.store);
        let id = entry.id;
        obs::spawn_best_effort("cache hit count", async move {
            store.record_hit(id, Utc::now()).await
        });

        Some(entity)
    }

    /// Stores `entity` under `key` with the default TTL.
    pub async fn put<T: Cacheable>(&self, key: &str, entity: &T) -> Result<(), AppError> {
        self.put_with_ttl(key, entity, self.ttl_seconds).await
    }

    pub async fn put_with_ttl<T: Cacheable>(
        &self,
        key: &str,
        entity: &T,
        ttl_seconds: u64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                AppError::InternalError(format!("Cache TTL out of range: {}s", ttl_seconds))
            })?;
        let entry = CacheEntry {
            id: Uuid::new_v4(),
            kind: T::KIND,
            input_key: key.to_lowercase(),
            payload: SealedPayload::seal(entity)?,
            confidence_score: entity.confidence_score(),
            data_sources: entity.data_sources().to_vec(),
            company_domain: entity.company_domain(),
            created_at: now,
            updated_at: now,
            expires_at,
            hit_count: 0,
            last_accessed_at: None,
        };

        self.store.insert(entry).await?;
        tracing::debug!("Cached {} {} for {}s", T::KIND.as_str(), key, ttl_seconds);
        Ok(())
    }

    pub async fn invalidate<T: Cacheable>(&self, key: &str) -> Result<u64, AppError> {
        let removed = self.store.invalidate(T::KIND, &key.to_lowercase()).await?;
        tracing::info!("Invalidated {} cache rows for {}", removed, key);
        Ok(removed)
    }

    /// Cached people linked to a company domain.
    pub async fn search_people(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<EnrichedPerson>, AppError> {
        let entries = self
            .store
            .search_by_domain(&normalize_domain(domain), limit, Utc::now())
            .await?;

        Ok(entries
            .iter()
            .filter_map(|entry| entry.payload.open())
            .collect())
    }

    pub async fn stats(&self) -> Result<CacheStats, AppError> {
        self.store.stats(Utc::now()).await
    }

    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        self.store.purge_expired(Utc::now()).await
    }
}

/// In-process cache store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<Vec<CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical row count, expired rows included.
    pub async fn row_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn rows(&self) -> Vec<CacheEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn insert(&self, entry: CacheEntry) -> Result<(), AppError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn find_live(
        &self,
        kind: EntityKind,
        input_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, AppError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind && e.input_key == input_key && e.is_live(now))
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn record_hit(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.hit_count += 1;
            entry.last_accessed_at = Some(now);
        }
        Ok(())
    }

    async fn invalidate(&self, kind: EntityKind, input_key: &str) -> Result<u64, AppError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !(e.kind == kind && e.input_key == input_key));
        Ok((before - entries.len()) as u64)
    }

    async fn search_by_domain(
        &self,
        domain: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>, AppError> {
        let mut matches: Vec<CacheEntry> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| {
                e.kind == EntityKind::Person
                    && e.is_live(now)
                    && e.company_domain.as_deref() == Some(domain)
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<CacheStats, AppError> {
        let entries = self.entries.read().await;
        let live: Vec<&CacheEntry> = entries.iter().filter(|e| e.is_live(now)).collect();
        if live.is_empty() {
            return Ok(CacheStats::default());
        }

        let total_entries = live.len() as i64;
        Ok(CacheStats {
            total_entries,
            total_hits: live.iter().map(|e| e.hit_count).sum(),
            avg_confidence: live.iter().map(|e| e.confidence_score).sum::<f64>()
                / total_entries as f64,
            cache_size_mb: live.iter().map(|e| e.payload.len()).sum::<usize>() as f64
                / BYTES_PER_MB,
        })
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompanyLink, Contact};

    fn person(email: &str, domain: Option<&str>, confidence: f64) -> EnrichedPerson {
        EnrichedPerson {
            name: None,
            email: Some(email.to_string()),
            emails: vec![],
            profile: None,
            company: domain.map(|d| CompanyLink {
                domain: d.to_string(),
                name: None,
                confidence: 0.7,
            }),
            social: None,
            location: None,
            confidence_score: confidence,
            data_sources: vec![DataSource::Activity],
            last_updated: Utc::now(),
        }
    }

    fn company(domain: &str) -> EnrichedCompany {
        EnrichedCompany {
            domain: domain.to_string(),
            name: None,
            legal_name: None,
            website: None,
            description: None,
            location: None,
            contact: Contact::default(),
            registration: None,
            organization: None,
            domain_inferred: false,
            confidence_score: 0.5,
            data_sources: vec![DataSource::Registration],
            last_updated: Utc::now(),
        }
    }

    fn cache() -> (Arc<MemoryCacheStore>, EnrichmentCache) {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = EnrichmentCache::new(store.clone(), DEFAULT_TTL_SECONDS);
        (store, cache)
    }

    #[test]
    fn test_cache_key_precedence() {
        assert_eq!(cache_key(Some("A@B.com"), None, None).unwrap(), "email:a@b.com");
        assert_eq!(cache_key(None, None, Some("WWW.X.com")).unwrap(), "domain:x.com");
        assert_eq!(
            cache_key(Some("a@b.com"), None, Some("x.com")).unwrap(),
            "email:a@b.com"
        );
        assert_eq!(
            cache_key(None, Some("OctoCat"), Some("x.com")).unwrap(),
            "handle:octocat"
        );
        assert!(cache_key(None, None, None).is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let (store, cache) = cache();
        let entity = person("jane@acme.io", Some("acme.io"), 0.8);

        let err = cache
            .put_with_ttl("email:jane@acme.io", &entity, u64::MAX)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "internal_error");

        let err = cache
            .put_with_ttl("email:jane@acme.io", &entity, 100_000_000_000_000)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "internal_error");
        assert_eq!(store.row_count().await, 0);

        cache
            .put_with_ttl("email:jane@acme.io", &entity, MAX_TTL_SECONDS)
            .await
            .unwrap();
        assert_eq!(store.row_count().await, 1);
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrips() {
        let (_, cache) = cache();
        let entity = person("jane@acme.io", Some("acme.io"), 0.8);

        cache.put("email:jane@acme.io", &entity).await.unwrap();
        let cached: EnrichedPerson = cache.get("EMAIL:JANE@ACME.IO").await.unwrap();
        assert_eq!(cached, entity);

        // Kinds are separate namespaces
        assert!(cache.get::<EnrichedCompany>("email:jane@acme.io").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_row_is_a_miss() {
        let (store, cache) = cache();
        cache
            .put_with_ttl("domain:acme.io", &company("acme.io"), 0)
            .await
            .unwrap();

        assert!(cache.get::<EnrichedCompany>("domain:acme.io").await.is_none());
        assert_eq!(store.row_count().await, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(store.row_count().await, 0);
    }

    #[tokio::test]
    async fn test_write_always_inserts_and_newest_wins() {
        let (store, cache) = cache();
        cache.put("domain:acme.io", &company("acme.io")).await.unwrap();

        let mut newer = company("acme.io");
        newer.name = Some("Acme".into());
        cache.put("domain:acme.io", &newer).await.unwrap();

        assert_eq!(store.row_count().await, 2);
        let cached: EnrichedCompany = cache.get("domain:acme.io").await.unwrap();
        assert_eq!(cached.name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn test_tampered_payload_is_a_miss() {
        let (store, cache) = cache();
        cache.put("domain:acme.io", &company("acme.io")).await.unwrap();

        {
            let mut rows = store.entries.write().await;
            rows[0].payload.data = rows[0].payload.data.replace("0.5", "0.99");
        }

        assert!(cache.get::<EnrichedCompany>("domain:acme.io").await.is_none());
    }

    #[tokio::test]
    async fn test_hit_count_recorded_in_background() {
        let (store, cache) = cache();
        cache.put("domain:acme.io", &company("acme.io")).await.unwrap();

        assert!(cache.get::<EnrichedCompany>("domain:acme.io").await.is_some());

        let mut hits = 0;
        for _ in 0..50 {
            hits = store.rows().await[0].hit_count;
            if hits == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(hits, 1);
        assert!(store.rows().await[0].last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_removes_rows() {
        let (_, cache) = cache();
        cache.put("domain:acme.io", &company("acme.io")).await.unwrap();

        assert_eq!(cache.invalidate::<EnrichedCompany>("domain:acme.io").await.unwrap(), 1);
        assert!(cache.get::<EnrichedCompany>("domain:acme.io").await.is_none());
    }

    #[tokio::test]
    async fn test_search_people_by_domain_column() {
        let (_, cache) = cache();
        cache
            .put("email:a@acme.io", &person("a@acme.io", Some("acme.io"), 0.5))
            .await
            .unwrap();
        cache
            .put("email:b@acme.io", &person("b@acme.io", Some("ACME.io"), 0.9))
            .await
            .unwrap();
        // Mentions the domain only inside the payload
        cache
            .put("email:c@other.io", &person("acme.io@other.io", Some("other.io"), 0.99))
            .await
            .unwrap();

        let people = cache.search_people("acme.io", 10).await.unwrap();
        let emails: Vec<_> = people.iter().filter_map(|p| p.email.as_deref()).collect();
        assert_eq!(emails, vec!["b@acme.io", "a@acme.io"]);
    }

    #[tokio::test]
    async fn test_stats_cover_live_rows() {
        let (_, cache) = cache();
        cache.put("domain:a.io", &company("a.io")).await.unwrap();
        cache.put_with_ttl("domain:b.io", &company("b.io"), 0).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.avg_confidence, 0.5);
        assert!(stats.cache_size_mb > 0.0);
    }
}
