use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ============ Enriched Entities ============

/// Source tag attached to every finding and listed in `data_sources`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Canonical identity-platform profile.
    Profile,
    /// Identity-platform activity history (commits).
    Activity,
    /// Public repository listing.
    Repositories,
    /// Organizational directory entry.
    Directory,
    /// Domain registration record.
    Registration,
    /// Self-published website.
    Website,
    /// Professional network profile.
    ProfessionalNetwork,
    /// Previously validated cache entry.
    Cache,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Profile => "profile",
            DataSource::Activity => "activity",
            DataSource::Repositories => "repositories",
            DataSource::Directory => "directory",
            DataSource::Registration => "registration",
            DataSource::Website => "website",
            DataSource::ProfessionalNetwork => "professional_network",
            DataSource::Cache => "cache",
        }
    }
}

/// Inferred role of an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Work,
    Personal,
    Admin,
    Technical,
    General,
}

/// An email address found by one of the sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Email {
    /// Lowercased address.
    pub value: String,
    #[serde(rename = "type")]
    pub email_type: EmailType,
    pub source: DataSource,
    /// Per-email confidence (0.0-1.0).
    pub confidence: f64,
    pub verified: bool,
    pub last_seen: DateTime<Utc>,
}

/// A phone number attached to a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Phone {
    pub value: String,
    pub verified: bool,
}

/// Public repository summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
}

/// Identity-platform profile linked to a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LinkedProfile {
    pub handle: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Public email, when the owner chose to publish one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Free-text company affiliation (e.g. "@acme.io").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blog: Option<String>,
    pub public_repos: u64,
    pub followers: u64,
    pub following: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub top_repos: Vec<Repository>,
}

/// Organizational directory entry for a company domain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Organization {
    pub login: String,
    pub url: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub public_repos: u64,
    pub members: Option<u64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub languages: Vec<String>,
}

/// Domain registration record, stripped of the raw registrar payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct RegistrationRecord {
    #[serde(default)]
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_email: Option<String>,
    #[serde(default)]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnssec: Option<bool>,
    #[serde(default)]
    pub status: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct Contact {
    #[serde(default)]
    pub emails: Vec<Email>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Company affiliation inferred for a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CompanyLink {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct SocialProfiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub professional_network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Best-effort profile of a person. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnrichedPerson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Primary email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub emails: Vec<Email>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<LinkedProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<CompanyLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social: Option<SocialProfiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub confidence_score: f64,
    pub data_sources: Vec<DataSource>,
    pub last_updated: DateTime<Utc>,
}

/// Best-effort profile of a company, keyed by its canonical domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnrichedCompany {
    /// Canonical domain: lowercase, no `www.`.
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub contact: Contact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
    /// True when the domain was guessed from the company name.
    #[serde(default)]
    pub domain_inferred: bool,
    pub confidence_score: f64,
    pub data_sources: Vec<DataSource>,
    pub last_updated: DateTime<Utc>,
}

// ============ API Request Models ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Company,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Company => "company",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PersonEnrichmentRequest {
    pub email: Option<String>,
    pub domain: Option<String>,
    #[serde(alias = "github_username")]
    pub handle: Option<String>,
    #[serde(alias = "linkedin_url")]
    pub professional_network_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CompanyEnrichmentRequest {
    pub domain: Option<String>,
    pub name: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkEnrichmentRequest {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Person or company requests, depending on `type` (1-100 items).
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchPeopleQuery {
    pub domain: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

// ============ API Response Models ============

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PersonEnrichmentResponse {
    pub person: EnrichedPerson,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompanyEnrichmentResponse {
    pub company: EnrichedCompany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BulkItemStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkItemResult {
    #[schema(value_type = Object)]
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<EnrichedPerson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<EnrichedCompany>,
    pub status: BulkItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub credits_used: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkEnrichmentResponse {
    pub results: Vec<BulkItemResult>,
    pub summary: BulkSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchPerson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchPeopleResponse {
    pub people: Vec<SearchPerson>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Operational,
    Degraded,
    Maintenance,
}

/// Health row for one upstream data source.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct SourceHealth {
    #[serde(skip)]
    pub source: String,
    pub status: String,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, FromRow, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_hits: i64,
    pub avg_confidence: f64,
    pub cache_size_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitSettings {
    pub requests_per_minute: i32,
    pub requests_per_day: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: ServiceStatus,
    pub version: String,
    /// Seconds since the process started.
    pub uptime: u64,
    pub data_sources: BTreeMap<String, SourceHealth>,
    pub cache: CacheStats,
    pub rate_limits: RateLimitSettings,
}

// ============ Account Models ============

/// API key record. Only the SHA-256 hash of the key is stored.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_hash: String,
    /// First characters of the key, safe to log.
    pub key_prefix: String,
    /// Plan tier (free, starter, growth, pro).
    pub tier: String,
    pub rate_limit_rpm: i32,
    pub rate_limit_rpd: i32,
    pub credits_limit: i32,
    pub credits_used: i32,
    pub credits_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

/// One row of the usage log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub api_key_id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub request_id: Uuid,
    pub response_status: u16,
    pub response_time_ms: i64,
    pub credits_used: i32,
    pub cache_hit: bool,
    pub confidence_score: Option<f64>,
    pub data_sources: Vec<DataSource>,
    pub error_message: Option<String>,
}
