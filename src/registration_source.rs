//! Domain-registration adapter.

use crate::errors::AppError;
use crate::models::{DataSource, Email, EmailType, RegistrationRecord};
use crate::raw_store::{
    age_days, get_json, non_blank, parse_timestamp, registration_key, RawStore, SourceLookup,
    UNKNOWN_AGE_DAYS,
};
use crate::validation::normalize_domain;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Substrings identifying registrar privacy-proxy contacts.
const PRIVACY_MARKERS: &[&str] = &[
    "whoisguard",
    "whoisprotect",
    "domainprivacy",
    "privateemail",
    "contactprivacy",
    "proxy",
    "privacy",
    "redacted",
    "anonymized",
];

pub fn is_privacy_email(email: &str) -> bool {
    let lower = email.to_lowercase();
    PRIVACY_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn reads_as_privacy(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("privacy") || lower.contains("redacted")
}

/// Registrant, admin and technical contacts, minus privacy-proxy addresses.
fn extract_emails(record: &RegistrationRecord, now: DateTime<Utc>) -> Vec<Email> {
    let last_seen = record
        .updated_date
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let contacts = [
        (&record.registrant_email, EmailType::General, 0.7),
        (&record.admin_email, EmailType::Admin, 0.75),
        (&record.technical_email, EmailType::Technical, 0.7),
    ];

    let mut emails: Vec<Email> = Vec::new();
    for (value, email_type, confidence) in contacts {
        let Some(value) = value.as_deref() else {
            continue;
        };
        let value = value.trim().to_lowercase();
        if value.is_empty() || is_privacy_email(&value) || emails.iter().any(|e| e.value == value)
        {
            continue;
        }

        emails.push(Email {
            value,
            email_type,
            source: DataSource::Registration,
            confidence,
            verified: false,
            last_seen,
        });
    }

    emails
}

/// Confidence of a registration record given its age.
pub fn registration_confidence(
    record: &RegistrationRecord,
    age_days: i64,
    now: DateTime<Utc>,
) -> f64 {
    let mut confidence: f64 = 0.65;

    if record.registrant_name.is_some() {
        confidence += 0.05;
    }
    if record.registrant_organization.is_some() {
        confidence += 0.05;
    }
    if matches!(&record.registrant_email, Some(e) if !is_privacy_email(e)) {
        confidence += 0.1;
    }
    if record
        .registrant_name
        .as_deref()
        .is_some_and(reads_as_privacy)
    {
        confidence -= 0.2;
    }
    if age_days > 90 {
        confidence -= 0.1;
    }
    if age_days > 180 {
        confidence -= 0.1;
    }

    let recently_updated = record
        .updated_date
        .as_deref()
        .and_then(parse_timestamp)
        .is_some_and(|updated| (now - updated).num_days() < 30);
    if recently_updated {
        confidence += 0.05;
    }

    confidence.clamp(0.0, 1.0)
}

fn normalize_record(mut record: RegistrationRecord, domain: &str) -> RegistrationRecord {
    if record.domain.trim().is_empty() {
        record.domain = domain.to_string();
    }
    record.registrar = non_blank(record.registrar);
    record.registered_date = non_blank(record.registered_date);
    record.expiration_date = non_blank(record.expiration_date);
    record.updated_date = non_blank(record.updated_date);
    record.registrant_name = non_blank(record.registrant_name);
    record.registrant_email = non_blank(record.registrant_email);
    record.registrant_organization = non_blank(record.registrant_organization);
    record.registrant_country = non_blank(record.registrant_country);
    record.registrant_phone = non_blank(record.registrant_phone);
    record.admin_email = non_blank(record.admin_email);
    record.technical_email = non_blank(record.technical_email);
    record
}

/// Company lookups against registration records.
#[derive(Clone)]
pub struct RegistrationSource {
    store: Arc<dyn RawStore>,
}

impl RegistrationSource {
    pub fn new(store: Arc<dyn RawStore>) -> Self {
        Self { store }
    }

    pub async fn enrich(
        &self,
        domain: &str,
    ) -> Result<SourceLookup<RegistrationRecord>, AppError> {
        let domain = normalize_domain(domain);
        let key = registration_key(&domain);

        let Some(record) = get_json::<RegistrationRecord>(self.store.as_ref(), &key).await? else {
            tracing::debug!("No registration record for {}", domain);
            return Ok(SourceLookup::miss());
        };
        let now = Utc::now();
        let record = normalize_record(record, &domain);

        let age_days = age_days(self.store.as_ref(), &key, now)
            .await
            .ok()
            .flatten()
            .unwrap_or(UNKNOWN_AGE_DAYS);
        let emails = extract_emails(&record, now);
        let confidence = registration_confidence(&record, age_days, now);

        tracing::debug!(
            "Registration for {} resolved: {} usable emails, confidence {:.2}",
            domain,
            emails.len(),
            confidence
        );

        Ok(SourceLookup {
            record: Some(record),
            emails,
            confidence,
            age_days,
        })
    }
}
