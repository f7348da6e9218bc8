//! Read-only access to the raw-record data lake that the source adapters
//! consume. Records are JSON objects addressed by normalized, lowercase keys.

use crate::errors::AppError;
use crate::models::Email;
use crate::validation::{email_domain, normalize_domain};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Age reported when a record's capture time is unknown.
pub const UNKNOWN_AGE_DAYS: i64 = 999;

#[async_trait]
pub trait RawStore: Send + Sync {
    /// Fetches the object body. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    /// Upload timestamp of the object, if known.
    async fn uploaded_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, AppError>;
}

// ============ Key Layout ============

fn shard(id: &str) -> String {
    id.chars().next().map(String::from).unwrap_or_default()
}

pub fn profile_key(handle: &str) -> String {
    let handle = handle.to_lowercase();
    format!("profiles/{}/{}.json", shard(&handle), handle)
}

pub fn repos_key(handle: &str) -> String {
    let handle = handle.to_lowercase();
    format!("repos/{}/{}.json", shard(&handle), handle)
}

/// `None` when the email has no domain part.
pub fn activity_key(email: &str) -> Option<String> {
    let email = email.to_lowercase();
    let domain = email_domain(&email)?;
    Some(format!("activity/by-email/{}/{}.json", domain, email))
}

pub fn org_key(login: &str) -> String {
    let login = login.to_lowercase();
    format!("orgs/{}/{}.json", shard(&login), login)
}

pub fn registration_key(domain: &str) -> String {
    let domain = normalize_domain(domain);
    let tld = domain.rsplit('.').next().unwrap_or("com");
    format!("registrations/{}/{}.json", tld, domain)
}

pub fn people_by_domain_key(domain: &str) -> String {
    format!("profiles/by-domain/{}.json", normalize_domain(domain))
}

/// Rejects keys that would escape their prefix once resolved as a URL path:
/// empty, `.` or `..` segments, and query, fragment, escape or backslash
/// characters.
pub fn check_key(key: &str) -> Result<(), AppError> {
    let bad_char = key
        .chars()
        .any(|c| matches!(c, '?' | '#' | '%' | '\\') || c.is_whitespace() || c.is_control());
    let bad_segment = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if key.is_empty() || bad_char || bad_segment {
        return Err(AppError::BadRequest(format!("Invalid record key {:?}", key)));
    }
    Ok(())
}

// ============ Lookup Result ============

/// Normalized output of one source adapter call.
///
/// A total miss has no record, no emails and zero confidence. It is a normal
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLookup<R> {
    pub record: Option<R>,
    pub emails: Vec<Email>,
    pub confidence: f64,
    pub age_days: i64,
}

impl<R> SourceLookup<R> {
    pub fn miss() -> Self {
        Self {
            record: None,
            emails: Vec::new(),
            confidence: 0.0,
            age_days: UNKNOWN_AGE_DAYS,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.record.is_some() || !self.emails.is_empty()
    }
}

// ============ Helpers ============

/// Parses the timestamp formats found in raw records.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f %z")
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|d| DateTime::<Utc>::from_naive_utc_and_offset(d.and_time(NaiveTime::MIN), Utc))
        })
        .ok()
}

/// Empty or whitespace-only strings become `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fetches and decodes a JSON record. A body that fails to decode is an error.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn RawStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| AppError::ExternalApiError(format!("Malformed record {}: {}", key, e)))
}

/// Whole days since the record at `key` was uploaded.
pub async fn age_days(
    store: &dyn RawStore,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>, AppError> {
    Ok(store
        .uploaded_at(key)
        .await?
        .map(|uploaded| (now - uploaded).num_days().max(0)))
}

// ============ HTTP Store ============

/// Data lake exposed over HTTP (object-store gateway or CDN).
#[derive(Clone)]
pub struct HttpRawStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRawStore {
    /// Creates a new `HttpRawStore`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL under which record keys are resolved.
    /// * `token` - Optional bearer token.
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create data lake client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, key: &str) -> Result<String, AppError> {
        check_key(key)?;
        Ok(format!("{}/{}", self.base_url, key))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RawStore for HttpRawStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        tracing::debug!("Fetching raw record {}", key);

        let response = self
            .authorize(self.client.get(self.url(key)?))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Data lake returned {} for {}",
                response.status(),
                key
            )));
        }

        let body = response.bytes().await?;
        Ok(Some(body.to_vec()))
    }

    async fn uploaded_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let response = self
            .authorize(self.client.head(self.url(key)?))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let uploaded = response
            .headers()
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(uploaded)
    }
}

// ============ In-Memory Store ============

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    uploaded_at: Option<DateTime<Utc>>,
}

/// In-process data lake for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryRawStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryRawStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a JSON value under `key`.
    pub async fn put_json(
        &self,
        key: &str,
        value: &serde_json::Value,
        uploaded_at: Option<DateTime<Utc>>,
    ) {
        self.put_raw(key, value.to_string().into_bytes(), uploaded_at)
            .await;
    }

    /// Stores raw bytes under `key`, valid JSON or not.
    pub async fn put_raw(&self, key: &str, body: Vec<u8>, uploaded_at: Option<DateTime<Utc>>) {
        self.objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { body, uploaded_at });
    }
}

#[async_trait]
impl RawStore for MemoryRawStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        check_key(key)?;
        Ok(self.objects.read().await.get(key).map(|o| o.body.clone()))
    }

    async fn uploaded_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        check_key(key)?;
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .and_then(|o| o.uploaded_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_key_layout() {
        assert_eq!(profile_key("OctoCat"), "profiles/o/octocat.json");
        assert_eq!(repos_key("octocat"), "repos/o/octocat.json");
        assert_eq!(
            activity_key("Jane@Acme.io").as_deref(),
            Some("activity/by-email/acme.io/jane@acme.io.json")
        );
        assert_eq!(activity_key("nodomain"), None);
        assert_eq!(org_key("Acme"), "orgs/a/acme.json");
        assert_eq!(
            registration_key("www.Example.co.uk"),
            "registrations/uk/example.co.uk.json"
        );
        assert_eq!(
            people_by_domain_key("ACME.io"),
            "profiles/by-domain/acme.io.json"
        );
    }

    #[test]
    fn test_check_key_rejects_escapes() {
        assert!(check_key("profiles/o/octocat.json").is_ok());
        assert!(check_key("activity/by-email/acme.io/first.last+tag@acme.io.json").is_ok());

        assert!(check_key("").is_err());
        assert!(check_key("profiles/a/../../registrations/com/victim.json").is_err());
        assert!(check_key("profiles/./x.json").is_err());
        assert!(check_key("profiles//x.json").is_err());
        assert!(check_key("profiles/x.json?token=1").is_err());
        assert!(check_key("profiles/x.json#frag").is_err());
        assert!(check_key("profiles/%2e%2e/x.json").is_err());
        assert!(check_key("profiles\\x.json").is_err());
        assert!(check_key("profiles/x y.json").is_err());
    }

    #[tokio::test]
    async fn test_memory_store_rejects_escaping_keys() {
        let store = MemoryRawStore::new();
        store.put_json("registrations/com/victim.json", &json!({}), None).await;

        let err = store
            .get("profiles/a/../../registrations/com/victim.json")
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "validation_error");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_miss_is_not_a_hit() {
        let miss: SourceLookup<()> = SourceLookup::miss();
        assert!(!miss.is_hit());
        assert_eq!(miss.age_days, UNKNOWN_AGE_DAYS);
    }

    #[tokio::test]
    async fn test_get_json_missing_is_none() {
        let store = MemoryRawStore::new();
        let value: Option<serde_json::Value> = get_json(&store, "nope.json").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_get_json_malformed_is_error() {
        let store = MemoryRawStore::new();
        store.put_raw("bad.json", b"{not json".to_vec(), None).await;

        let result: Result<Option<serde_json::Value>, _> = get_json(&store, "bad.json").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_age_days_counts_whole_days() {
        let store = MemoryRawStore::new();
        let now = Utc::now();
        store
            .put_json("a.json", &json!({}), Some(now - ChronoDuration::hours(50)))
            .await;
        store.put_json("b.json", &json!({}), None).await;

        assert_eq!(age_days(&store, "a.json", now).await.unwrap(), Some(2));
        assert_eq!(age_days(&store, "b.json", now).await.unwrap(), None);
    }
}
