//! Identity-platform adapters: profile + activity for people, organizational
//! directory for companies.

use crate::errors::AppError;
use crate::models::{DataSource, Email, EmailType, LinkedProfile, Organization, Repository};
use crate::raw_store::{
    activity_key, age_days, get_json, non_blank, org_key, parse_timestamp,
    people_by_domain_key, profile_key, repos_key, RawStore, SourceLookup, UNKNOWN_AGE_DAYS,
};
use crate::validation::{email_domain, normalize_domain};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const PROFILE_BASE_URL: &str = "https://github.com";
const PLATFORM_NOREPLY: &str = "noreply@github.com";
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "icloud.com",
    "proton.me",
];

const EMAIL_ONLY_CONFIDENCE: f64 = 0.6;
const EMAIL_ONLY_AGE_DAYS: i64 = 30;
const DIRECTORY_CONFIDENCE: f64 = 0.7;
const DIRECTORY_DEFAULT_AGE_DAYS: i64 = 30;
const TOP_N: usize = 5;

// ============ Raw Records ============

#[derive(Debug, Clone, Deserialize)]
struct RawProfile {
    login: String,
    name: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    company: Option<String>,
    blog: Option<String>,
    #[serde(default)]
    public_repos: u64,
    #[serde(default)]
    followers: u64,
    #[serde(default)]
    following: u64,
    created_at: Option<String>,
    updated_at: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawActivity {
    #[serde(default)]
    url: String,
    author_email: Option<String>,
    committer_email: Option<String>,
    committed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRepository {
    name: String,
    #[serde(default)]
    full_name: String,
    description: Option<String>,
    #[serde(default)]
    html_url: String,
    language: Option<String>,
    stargazers_count: Option<u64>,
    forks_count: Option<u64>,
    watchers_count: Option<u64>,
    created_at: Option<String>,
    updated_at: Option<String>,
    pushed_at: Option<String>,
}

/// Raw profile row of the people-by-domain index.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainProfile {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

// ============ Heuristics ============

fn local_part(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Infers the role of an address from its local part and domain.
pub fn infer_email_type(email: &str) -> EmailType {
    let local = local_part(email);

    if local.contains("admin") {
        return EmailType::Admin;
    }
    if local.contains("support") || local.contains("help") || local.contains("tech") {
        return EmailType::Technical;
    }
    if matches!(local.as_str(), "info" | "contact" | "hello") {
        return EmailType::General;
    }
    if let Some(domain) = email_domain(email) {
        if FREE_MAIL_DOMAINS.contains(&domain.as_str()) {
            return EmailType::Personal;
        }
    }

    EmailType::Work
}

/// Per-email confidence from activity volume and placeholder detection.
pub fn email_confidence(email: &str, activity_count: usize) -> f64 {
    let mut confidence: f64 = 0.7;

    if activity_count >= 100 {
        confidence += 0.2;
    } else if activity_count >= 10 {
        confidence += 0.1;
    }

    if matches!(local_part(email).as_str(), "noreply" | "no-reply") {
        confidence -= 0.5;
    }

    confidence.clamp(0.0, 1.0)
}

/// Overall confidence of a profile lookup.
pub fn profile_confidence(profile: &LinkedProfile, age_days: i64) -> f64 {
    let mut confidence: f64 = 0.85;

    if profile.email.is_some() {
        confidence += 0.05;
    }
    if profile.followers > 100 {
        confidence += 0.05;
    }
    if profile.public_repos > 10 {
        confidence += 0.05;
    }
    if age_days > 30 {
        confidence -= 0.1;
    }
    if age_days > 90 {
        confidence -= 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

/// Most used languages by repository count, ties broken alphabetically.
fn top_languages(repos: &[RawRepository]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lang in repos.iter().filter_map(|r| r.language.as_deref()) {
        *counts.entry(lang).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(TOP_N)
        .map(|(lang, _)| lang.to_string())
        .collect()
}

fn top_repositories(mut repos: Vec<RawRepository>) -> Vec<Repository> {
    repos.sort_by(|a, b| {
        b.stargazers_count
            .unwrap_or(0)
            .cmp(&a.stargazers_count.unwrap_or(0))
    });

    repos
        .into_iter()
        .take(TOP_N)
        .map(|repo| Repository {
            name: repo.name,
            full_name: repo.full_name,
            description: repo.description,
            url: repo.html_url,
            language: repo.language,
            stars: repo.stargazers_count.unwrap_or(0),
            forks: repo.forks_count.unwrap_or(0),
            watchers: repo.watchers_count.unwrap_or(0),
            created_at: repo.created_at,
            updated_at: repo.updated_at,
            pushed_at: repo.pushed_at,
        })
        .collect()
}

/// Profile email plus activity author/committer emails, lowercased, in
/// first-seen order, without the platform no-reply address.
fn collect_emails(profile_email: Option<&str>, activity: &[RawActivity]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let candidates = profile_email.into_iter().chain(
        activity
            .iter()
            .flat_map(|a| [a.author_email.as_deref(), a.committer_email.as_deref()])
            .flatten(),
    );

    for candidate in candidates {
        let email = candidate.trim().to_lowercase();
        if email.is_empty() || email == PLATFORM_NOREPLY || seen.contains(&email) {
            continue;
        }
        seen.push(email);
    }

    seen
}

fn last_seen(email: &str, activity: &[RawActivity], now: DateTime<Utc>) -> DateTime<Utc> {
    activity
        .iter()
        .find(|a| {
            [a.author_email.as_deref(), a.committer_email.as_deref()]
                .into_iter()
                .flatten()
                .any(|e| e.eq_ignore_ascii_case(email))
        })
        .and_then(|a| a.committed_at.as_deref())
        .and_then(parse_timestamp)
        .unwrap_or(now)
}

/// Owner handle from the first path segment of an activity URL.
fn activity_owner(activity: &[RawActivity]) -> Option<String> {
    activity.iter().find_map(|a| {
        let url = url::Url::parse(&a.url).ok()?;
        let owner = url.path_segments()?.next()?;
        if owner.is_empty() {
            None
        } else {
            Some(owner.to_string())
        }
    })
}

/// Org logins a domain may be registered under.
fn org_candidates(domain: &str) -> Vec<String> {
    let domain = normalize_domain(domain);
    let first = domain.split('.').next().unwrap_or_default().to_string();
    let mut candidates = vec![first, domain.replace('.', "-"), domain.replace('.', "")];
    candidates.dedup();
    candidates.retain(|c| !c.is_empty());
    candidates
}

// ============ Profile Source ============

/// People lookups against profile, activity and repository records.
#[derive(Clone)]
pub struct ProfileSource {
    store: Arc<dyn RawStore>,
}

impl ProfileSource {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self { store }
    }

    async fn activity_for(&self, email: &str) -> Result<Vec<RawActivity>, AppError> {
        match activity_key(email) {
            Some(key) => Ok(get_json(self.store.as_ref(), &key).await?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Enriches a person from an identity-platform handle.
    pub async fn enrich_by_handle(
        &self,
        handle: &str,
    ) -> Result<SourceLookup<LinkedProfile>, AppError> {
        let key = profile_key(handle);
        let Some(raw) = get_json::<RawProfile>(self.store.as_ref(), &key).await? else {
            tracing::debug!("No profile record for handle {}", handle);
            return Ok(SourceLookup::miss());
        };
        let now = Utc::now();

        let profile_email = non_blank(raw.email.clone());
        let activity_fut = async {
            match &profile_email {
                Some(email) => self.activity_for(email).await,
                None => Ok(Vec::new()),
            }
        };
        let repo_key = repos_key(handle);
        let repos_fut = get_json::<Vec<RawRepository>>(self.store.as_ref(), &repo_key);
        let age_fut = age_days(self.store.as_ref(), &key, now);
        let (activity, repos, age) = tokio::join!(activity_fut, repos_fut, age_fut);

        // Secondary records degrade to empty rather than failing the lookup
        let activity = activity.unwrap_or_else(|e| {
            tracing::warn!("Activity lookup failed for {}: {}", handle, e);
            Vec::new()
        });
        let repos = match repos {
            Ok(repos) => repos.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Repository lookup failed for {}: {}", handle, e);
                Vec::new()
            }
        };
        let age_days = age.ok().flatten().unwrap_or(UNKNOWN_AGE_DAYS);

        let public_email = profile_email.as_deref().map(str::to_lowercase);
        let emails: Vec<Email> = collect_emails(public_email.as_deref(), &activity)
            .into_iter()
            .map(|value| {
                let verified = public_email.as_deref() == Some(value.as_str());
                Email {
                    email_type: infer_email_type(&value),
                    source: if verified {
                        DataSource::Profile
                    } else {
                        DataSource::Activity
                    },
                    confidence: email_confidence(&value, activity.len()),
                    verified,
                    last_seen: last_seen(&value, &activity, now),
                    value,
                }
            })
            .collect();

        let profile = LinkedProfile {
            url: format!("{}/{}", PROFILE_BASE_URL, raw.login),
            handle: raw.login,
            name: non_blank(raw.name),
            email: profile_email,
            bio: non_blank(raw.bio),
            location: non_blank(raw.location),
            company: non_blank(raw.company),
            blog: non_blank(raw.blog),
            public_repos: raw.public_repos,
            followers: raw.followers,
            following: raw.following,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            avatar_url: non_blank(raw.avatar_url),
            languages: top_languages(&repos),
            top_repos: top_repositories(repos),
        };
        let confidence = profile_confidence(&profile, age_days);

        tracing::debug!(
            "Profile {} resolved: {} emails, confidence {:.2}, age {}d",
            profile.handle,
            emails.len(),
            confidence,
            age_days
        );

        Ok(SourceLookup {
            record: Some(profile),
            emails,
            confidence,
            age_days,
        })
    }

    /// Enriches a person from an email address via activity records.
    ///
    /// When the activity names an owner, the lookup is delegated to
    /// [`ProfileSource::enrich_by_handle`].
    pub async fn enrich_by_email(
        &self,
        email: &str,
    ) -> Result<SourceLookup<LinkedProfile>, AppError> {
        let activity = self.activity_for(email).await?;
        if activity.is_empty() {
            tracing::debug!("No activity records for {}", email);
            return Ok(SourceLookup::miss());
        }

        if let Some(owner) = activity_owner(&activity) {
            tracing::debug!("Activity for {} resolved to owner {}", email, owner);
            let lookup = self.enrich_by_handle(&owner).await?;
            if lookup.is_hit() {
                return Ok(lookup);
            }
        }

        let value = email.to_lowercase();
        let last_seen = activity
            .first()
            .and_then(|a| a.committed_at.as_deref())
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        Ok(SourceLookup {
            record: None,
            emails: vec![Email {
                email_type: infer_email_type(&value),
                source: DataSource::Activity,
                confidence: email_confidence(&value, activity.len()),
                verified: false,
                last_seen,
                value,
            }],
            confidence: EMAIL_ONLY_CONFIDENCE,
            age_days: EMAIL_ONLY_AGE_DAYS,
        })
    }

    /// Profiles indexed under a company domain.
    pub async fn profiles_by_domain(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<DomainProfile>, AppError> {
        let key = people_by_domain_key(domain);
        let mut profiles: Vec<DomainProfile> =
            get_json(self.store.as_ref(), &key).await?.unwrap_or_default();
        profiles.truncate(limit);
        Ok(profiles)
    }
}

// ============ Directory Source ============

/// Organizational directory lookups for company domains.
#[derive(Clone)]
pub struct DirectorySource {
    store: Arc<dyn RawStore>,
}

impl DirectorySource {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self { store }
    }

    /// Looks up the organization behind a domain. First candidate login wins.
    pub async fn enrich(&self, domain: &str) -> Result<SourceLookup<Organization>, AppError> {
        for login in org_candidates(domain) {
            let key = org_key(&login);
            let Some(mut org) = get_json::<Organization>(self.store.as_ref(), &key).await? else {
                continue;
            };

            if org.login.is_empty() {
                org.login = login.clone();
            }
            if org.url.is_none() {
                org.url = Some(format!("{}/{}", PROFILE_BASE_URL, org.login));
            }

            let age_days = age_days(self.store.as_ref(), &key, Utc::now())
                .await
                .ok()
                .flatten()
                .unwrap_or(DIRECTORY_DEFAULT_AGE_DAYS);

            return Ok(SourceLookup {
                record: Some(org),
                emails: Vec::new(),
                confidence: DIRECTORY_CONFIDENCE,
                age_days,
            });
        }

        Ok(SourceLookup::miss())
    }
}
