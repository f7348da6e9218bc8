//! Enrichment aggregation.
//!
//! For one request the aggregator:
//! 1. Derives the cache key and returns a live cached entity if present
//! 2. Fans out to the relevant source adapters concurrently
//! 3. Merges their findings (email dedup, primary fields, domain inference)
//! 4. Scores the findings and writes the entity back to the cache
//!
//! Adapter failures and timeouts never surface: they count as "no finding".
//! An aggregation where nothing is found still returns an entity, with a zero
//! confidence score and empty `data_sources`.

use crate::cache::{cache_key, EnrichmentCache};
use crate::errors::AppError;
use crate::models::{
    CompanyEnrichmentRequest, CompanyLink, Contact, DataSource, EnrichedCompany, EnrichedPerson,
    Email, LinkedProfile, Location, Organization, PersonEnrichmentRequest, Phone,
    RegistrationRecord, SocialProfiles,
};
use crate::profile_source::{DirectorySource, ProfileSource};
use crate::raw_store::{RawStore, SourceLookup};
use crate::registration_source::RegistrationSource;
use crate::scoring::{
    combine_emails, primary_email, ConfidenceScorer, FindingPayload, SourceFinding,
};
use crate::validation::{domain_from_url, email_domain, normalize_domain, slug_domain};
use chrono::Utc;
use regex::Regex;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Confidence of a company link inferred for a person.
const COMPANY_LINK_CONFIDENCE: f64 = 0.7;

static COMPANY_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").expect("company domain regex is valid")
});

/// An aggregated entity and whether it came straight from the cache.
#[derive(Debug, Clone)]
pub struct Enrichment<T> {
    pub entity: T,
    pub from_cache: bool,
}

impl<T> Enrichment<T> {
    /// Credits this enrichment costs: cache hits are free.
    pub fn credits(&self) -> u32 {
        if self.from_cache {
            0
        } else {
            1
        }
    }
}

#[derive(Clone)]
pub struct Aggregator {
    profiles: ProfileSource,
    registrations: RegistrationSource,
    directory: DirectorySource,
    cache: EnrichmentCache,
    scorer: ConfidenceScorer,
    adapter_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        raw: Arc<dyn RawStore>,
        cache: EnrichmentCache,
        scorer: ConfidenceScorer,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            profiles: ProfileSource::new(Arc::clone(&raw)),
            registrations: RegistrationSource::new(Arc::clone(&raw)),
            directory: DirectorySource::new(raw),
            cache,
            scorer,
            adapter_timeout,
        }
    }

    pub fn cache(&self) -> &EnrichmentCache {
        &self.cache
    }

    /// Runs one adapter call under the per-adapter timeout. Errors, timeouts
    /// and misses all come back as `None`.
    async fn run_adapter<R, F>(
        &self,
        adapter: &'static str,
        target: &str,
        call: F,
    ) -> Option<SourceLookup<R>>
    where
        F: Future<Output = Result<SourceLookup<R>, AppError>>,
    {
        match tokio::time::timeout(self.adapter_timeout, call).await {
            Ok(Ok(lookup)) if lookup.is_hit() => Some(lookup),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::warn!("{} adapter failed for {}: {}", adapter, target, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "{} adapter timed out for {} after {}ms",
                    adapter,
                    target,
                    self.adapter_timeout.as_millis()
                );
                None
            }
        }
    }

    pub async fn enrich_person(
        &self,
        req: &PersonEnrichmentRequest,
    ) -> Result<Enrichment<EnrichedPerson>, AppError> {
        let email = req.email.as_deref().map(|e| e.trim().to_lowercase());
        let handle = req.handle.as_deref().map(str::trim);
        let key = cache_key(email.as_deref(), handle, req.domain.as_deref())?;

        if let Some(person) = self.cache.get::<EnrichedPerson>(&key).await {
            return Ok(Enrichment {
                entity: person,
                from_cache: true,
            });
        }

        tracing::info!("Enriching person {}", key);

        let by_handle = async {
            match handle {
                Some(h) => {
                    self.run_adapter("profile", h, self.profiles.enrich_by_handle(h))
                        .await
                }
                None => None,
            }
        };
        let by_email = async {
            match email.as_deref() {
                Some(e) => {
                    self.run_adapter("activity", e, self.profiles.enrich_by_email(e))
                        .await
                }
                None => None,
            }
        };
        let (by_handle, by_email) = tokio::join!(by_handle, by_email);

        let mut findings = Vec::new();
        let mut fallback_profile = None;

        if let Some(lookup) = by_handle {
            if let Some(profile) = lookup.record {
                findings.push(SourceFinding::new(
                    FindingPayload::Profile {
                        profile,
                        emails: lookup.emails,
                    },
                    lookup.confidence,
                    lookup.age_days as f64,
                ));
            }
        }
        if let Some(lookup) = by_email {
            fallback_profile = lookup.record;
            findings.push(SourceFinding::new(
                FindingPayload::Activity {
                    emails: lookup.emails,
                },
                lookup.confidence,
                lookup.age_days as f64,
            ));
        }

        let score = self.scorer.score(&findings);
        let data_sources = finding_sources(&findings);
        let emails = combine_emails(findings.iter().flat_map(|f| f.emails().iter().cloned()));

        let profile = findings
            .into_iter()
            .find_map(|f| match f.payload {
                FindingPayload::Profile { profile, .. } => Some(profile),
                _ => None,
            })
            .or(fallback_profile);

        let primary = email
            .clone()
            .or_else(|| primary_email(&emails).map(|e| e.value.clone()));

        let person = EnrichedPerson {
            name: profile.as_ref().and_then(|p| p.name.clone()),
            email: primary,
            company: company_link(req, profile.as_ref(), email.as_deref()),
            social: social_profiles(req, profile.as_ref()),
            location: profile
                .as_ref()
                .and_then(|p| p.location.as_deref())
                .and_then(split_location),
            profile,
            emails,
            confidence_score: score.final_score,
            data_sources,
            last_updated: Utc::now(),
        };

        self.cache.put(&key, &person).await?;

        tracing::info!(
            "Person {} enriched: confidence {:.2}, sources {:?}",
            key,
            person.confidence_score,
            person.data_sources
        );

        Ok(Enrichment {
            entity: person,
            from_cache: false,
        })
    }

    pub async fn enrich_company(
        &self,
        req: &CompanyEnrichmentRequest,
    ) -> Result<Enrichment<EnrichedCompany>, AppError> {
        let (domain, domain_inferred) = resolve_company_domain(req)?;
        let key = cache_key(None, None, Some(&domain))?;

        if let Some(company) = self.cache.get::<EnrichedCompany>(&key).await {
            return Ok(Enrichment {
                entity: company,
                from_cache: true,
            });
        }

        tracing::info!(
            "Enriching company {}{}",
            domain,
            if domain_inferred { " (inferred domain)" } else { "" }
        );

        let (registration, directory) = tokio::join!(
            self.run_adapter("registration", &domain, self.registrations.enrich(&domain)),
            self.run_adapter("directory", &domain, self.directory.enrich(&domain)),
        );

        let mut findings = Vec::new();

        if let Some(lookup) = registration {
            let record = lookup.record.unwrap_or_default();
            let phone = record.registrant_phone.clone().map(|value| Phone {
                value,
                verified: false,
            });
            findings.push(SourceFinding::new(
                FindingPayload::Registration {
                    record,
                    emails: lookup.emails,
                    phone,
                },
                lookup.confidence,
                lookup.age_days as f64,
            ));
        }
        if let Some(lookup) = directory {
            if let Some(organization) = lookup.record {
                findings.push(SourceFinding::new(
                    FindingPayload::Directory { organization },
                    lookup.confidence,
                    lookup.age_days as f64,
                ));
            }
        }

        let score = self.scorer.score(&findings);
        let data_sources = finding_sources(&findings);

        let mut registration: Option<RegistrationRecord> = None;
        let mut organization: Option<Organization> = None;
        let mut emails: Vec<Email> = Vec::new();
        let mut phone: Option<Phone> = None;
        for finding in findings {
            match finding.payload {
                FindingPayload::Registration {
                    record,
                    emails: found,
                    phone: found_phone,
                } => {
                    registration = Some(record);
                    emails.extend(found);
                    phone = found_phone;
                }
                FindingPayload::Directory { organization: org } => organization = Some(org),
                FindingPayload::Profile { .. } | FindingPayload::Activity { .. } => {}
            }
        }

        let legal_name = registration
            .as_ref()
            .and_then(|r| r.registrant_organization.clone());
        let location = registration.as_ref().and_then(|r| {
            r.registrant_name.as_ref()?;
            r.registrant_country.as_ref().map(|country| Location {
                country: Some(country.clone()),
                ..Default::default()
            })
        });

        let company = EnrichedCompany {
            name: req
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .or_else(|| legal_name.clone()),
            legal_name,
            website: req
                .website
                .clone()
                .or_else(|| Some(format!("https://{}", domain))),
            description: organization.as_ref().and_then(|o| o.description.clone()),
            location,
            contact: Contact {
                emails: combine_emails(emails),
                phone: phone.map(|p| p.value),
                address: None,
            },
            registration,
            organization,
            domain_inferred,
            confidence_score: score.final_score,
            data_sources,
            last_updated: Utc::now(),
            domain,
        };

        self.cache.put(&key, &company).await?;

        tracing::info!(
            "Company {} enriched: confidence {:.2}, sources {:?}",
            company.domain,
            company.confidence_score,
            company.data_sources
        );

        Ok(Enrichment {
            entity: company,
            from_cache: false,
        })
    }
}

/// One tag per scored finding, in finding order.
fn finding_sources(findings: &[SourceFinding]) -> Vec<DataSource> {
    let mut sources = Vec::with_capacity(findings.len());
    for source in findings.iter().map(SourceFinding::source) {
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// Canonical company domain: explicit domain, then website host, then a slug
/// of the name. The flag is set for the slug case.
pub fn resolve_company_domain(
    req: &CompanyEnrichmentRequest,
) -> Result<(String, bool), AppError> {
    if let Some(domain) = req.domain.as_deref().filter(|d| !d.trim().is_empty()) {
        return Ok((normalize_domain(domain), false));
    }
    if let Some(website) = req.website.as_deref().filter(|w| !w.trim().is_empty()) {
        return Ok((domain_from_url(website)?, false));
    }
    if let Some(domain) = req.name.as_deref().and_then(slug_domain) {
        return Ok((domain, true));
    }

    Err(AppError::BadRequest(
        "Could not determine a company domain from domain, website, or name".to_string(),
    ))
}

/// Domain named as `@domain` in a free-text company affiliation.
pub fn affiliation_domain(company: &str) -> Option<String> {
    COMPANY_DOMAIN_RE
        .captures(company)
        .and_then(|c| c.get(1))
        .map(|m| normalize_domain(m.as_str()))
}

fn company_link(
    req: &PersonEnrichmentRequest,
    profile: Option<&LinkedProfile>,
    email: Option<&str>,
) -> Option<CompanyLink> {
    let affiliation = profile.and_then(|p| p.company.clone());

    let domain = req
        .domain
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(normalize_domain)
        .or_else(|| affiliation.as_deref().and_then(affiliation_domain))
        .or_else(|| email.and_then(email_domain))?;

    Some(CompanyLink {
        domain,
        name: affiliation,
        confidence: COMPANY_LINK_CONFIDENCE,
    })
}

fn social_profiles(
    req: &PersonEnrichmentRequest,
    profile: Option<&LinkedProfile>,
) -> Option<SocialProfiles> {
    let website = profile.and_then(|p| p.blog.clone());
    let professional_network = req.professional_network_url.clone();

    if website.is_none() && professional_network.is_none() {
        return None;
    }
    Some(SocialProfiles {
        twitter: None,
        professional_network,
        website,
    })
}

/// Splits "City, State, Country" into its parts.
pub fn split_location(raw: &str) -> Option<Location> {
    let parts: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let first = parts.first()?;

    Some(Location {
        city: Some(first.to_string()),
        state: if parts.len() >= 2 {
            Some(parts[1].to_string())
        } else {
            None
        },
        country: parts.last().map(|c| c.to_string()),
        address: Some(raw.trim().to_string()),
    })
}
