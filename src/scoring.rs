//! Confidence scoring for enrichment results.
//!
//! A composite score is derived from four factors:
//! - **base**: step function over the number of corroborating sources
//! - **source_weight**: reliability-weighted average of self-reported confidences
//! - **freshness_multiplier**: step function over the average record age
//! - **verification_boosts**: fixed bonuses for verified contact data, capped
//!
//! `final = clamp(base * source_weight * freshness + boosts, 0, 1)`, rounded to
//! two decimals. The calibration lives in [`ScoringTables`] so alternate tables
//! can be injected.

use crate::models::{DataSource, Email, LinkedProfile, Organization, Phone, RegistrationRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Calibration data for [`ConfidenceScorer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringTables {
    /// Reliability weight per source tag.
    pub reliability: BTreeMap<DataSource, f64>,
    /// Weight for tags missing from `reliability`.
    pub default_reliability: f64,
    /// Base confidence for exactly one source.
    pub base_one: f64,
    /// Base confidence for exactly two sources.
    pub base_two: f64,
    /// Base confidence for three or more sources.
    pub base_many: f64,
    /// `(max_average_age_days, multiplier)`, ascending by age.
    pub freshness: Vec<(f64, f64)>,
    /// Multiplier once the average age exceeds every breakpoint.
    pub stale_multiplier: f64,
    pub verified_email_boost: f64,
    pub verified_phone_boost: f64,
    pub boost_cap: f64,
}

impl Default for ScoringTables {
    fn default() -> Self {
        let reliability = BTreeMap::from([
            (DataSource::Profile, 1.0),
            (DataSource::Activity, 0.9),
            (DataSource::Repositories, 0.85),
            (DataSource::Directory, 0.8),
            (DataSource::Registration, 0.7),
            (DataSource::Website, 0.75),
            (DataSource::ProfessionalNetwork, 0.9),
            (DataSource::Cache, 0.95),
        ]);

        Self {
            reliability,
            default_reliability: 0.5,
            base_one: 0.60,
            base_two: 0.75,
            base_many: 0.85,
            freshness: vec![
                (7.0, 1.0),
                (30.0, 0.95),
                (90.0, 0.90),
                (180.0, 0.85),
                (365.0, 0.75),
            ],
            stale_multiplier: 0.60,
            verified_email_boost: 0.05,
            verified_phone_boost: 0.05,
            boost_cap: 0.15,
        }
    }
}

impl ScoringTables {
    pub fn reliability_of(&self, source: DataSource) -> f64 {
        self.reliability
            .get(&source)
            .copied()
            .unwrap_or(self.default_reliability)
    }
}

/// Source-specific body of a finding.
#[derive(Debug, Clone, PartialEq)]
pub enum FindingPayload {
    Profile {
        profile: LinkedProfile,
        emails: Vec<Email>,
    },
    Activity {
        emails: Vec<Email>,
    },
    Registration {
        record: RegistrationRecord,
        emails: Vec<Email>,
        phone: Option<Phone>,
    },
    Directory {
        organization: Organization,
    },
}

/// One adapter's contribution to an aggregation. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFinding {
    pub payload: FindingPayload,
    /// Self-reported confidence (0.0-1.0).
    pub confidence: f64,
    /// Days since the underlying raw record was captured.
    pub age_days: f64,
}

impl SourceFinding {
    pub fn new(payload: FindingPayload, confidence: f64, age_days: f64) -> Self {
        Self {
            payload,
            confidence,
            age_days,
        }
    }

    pub fn source(&self) -> DataSource {
        match self.payload {
            FindingPayload::Profile { .. } => DataSource::Profile,
            FindingPayload::Activity { .. } => DataSource::Activity,
            FindingPayload::Registration { .. } => DataSource::Registration,
            FindingPayload::Directory { .. } => DataSource::Directory,
        }
    }

    pub fn emails(&self) -> &[Email] {
        match &self.payload {
            FindingPayload::Profile { emails, .. }
            | FindingPayload::Activity { emails }
            | FindingPayload::Registration { emails, .. } => emails,
            FindingPayload::Directory { .. } => &[],
        }
    }

    fn has_verified_email(&self) -> bool {
        self.emails().iter().any(|e| e.verified)
    }

    fn has_verified_phone(&self) -> bool {
        matches!(
            &self.payload,
            FindingPayload::Registration {
                phone: Some(Phone { verified: true, .. }),
                ..
            }
        )
    }
}

/// Breakdown of a composite confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ConfidenceScore {
    pub base: f64,
    pub source_weight: f64,
    pub freshness_multiplier: f64,
    pub verification_boosts: f64,
    #[serde(rename = "final")]
    pub final_score: f64,
}

/// Pure scorer over a list of findings.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    tables: ScoringTables,
}

impl ConfidenceScorer {
    pub fn new(tables: ScoringTables) -> Self {
        Self { tables }
    }

    /// Scores a set of findings. Empty input yields an all-zero score.
    pub fn score(&self, findings: &[SourceFinding]) -> ConfidenceScore {
        if findings.is_empty() {
            return ConfidenceScore::default();
        }

        let base = self.base_confidence(findings.len());
        let source_weight = self.source_weight(findings);
        let freshness_multiplier = self.freshness_multiplier(findings);
        let verification_boosts = self.verification_boosts(findings);

        let raw = base * source_weight * freshness_multiplier + verification_boosts;

        ConfidenceScore {
            base,
            source_weight,
            freshness_multiplier,
            verification_boosts,
            final_score: round2(raw.clamp(0.0, 1.0)),
        }
    }

    fn base_confidence(&self, count: usize) -> f64 {
        match count {
            0 => 0.0,
            1 => self.tables.base_one,
            2 => self.tables.base_two,
            _ => self.tables.base_many,
        }
    }

    fn source_weight(&self, findings: &[SourceFinding]) -> f64 {
        let (weighted, total) = findings.iter().fold((0.0, 0.0), |(sum, total), f| {
            let weight = self.tables.reliability_of(f.source());
            (sum + f.confidence * weight, total + weight)
        });

        if total > 0.0 {
            weighted / total
        } else {
            0.0
        }
    }

    fn freshness_multiplier(&self, findings: &[SourceFinding]) -> f64 {
        let avg_age = findings.iter().map(|f| f.age_days).sum::<f64>() / findings.len() as f64;

        self.tables
            .freshness
            .iter()
            .find(|(max_age, _)| avg_age <= *max_age)
            .map(|(_, multiplier)| *multiplier)
            .unwrap_or(self.tables.stale_multiplier)
    }

    fn verification_boosts(&self, findings: &[SourceFinding]) -> f64 {
        let mut boosts = 0.0;

        if findings.iter().any(SourceFinding::has_verified_email) {
            boosts += self.tables.verified_email_boost;
        }
        if findings.iter().any(SourceFinding::has_verified_phone) {
            boosts += self.tables.verified_phone_boost;
        }

        f64::min(boosts, self.tables.boost_cap)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Merges emails from several sources.
///
/// Values are deduplicated case-insensitively. The higher-confidence instance
/// wins; on equal confidence a verified instance replaces an unverified one.
/// The result is sorted by confidence, highest first.
pub fn combine_emails<I>(emails: I) -> Vec<Email>
where
    I: IntoIterator<Item = Email>,
{
    let mut merged: Vec<Email> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for mut email in emails {
        email.value = email.value.to_lowercase();

        match index.get(&email.value) {
            Some(&pos) => {
                let existing = &merged[pos];
                let better = email.confidence > existing.confidence
                    || (email.confidence == existing.confidence
                        && email.verified
                        && !existing.verified);
                if better {
                    merged[pos] = email;
                }
            }
            None => {
                index.insert(email.value.clone(), merged.len());
                merged.push(email);
            }
        }
    }

    merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    merged
}

/// Picks the primary email: verified first, then highest confidence.
pub fn primary_email(emails: &[Email]) -> Option<&Email> {
    emails.iter().fold(None, |best: Option<&Email>, candidate| match best {
        None => Some(candidate),
        Some(current) => {
            let outranks = (candidate.verified && !current.verified)
                || (candidate.verified == current.verified
                    && candidate.confidence > current.confidence);
            if outranks {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
}

pub fn confidence_level(score: f64) -> ConfidenceLevel {
    if score >= 0.95 {
        ConfidenceLevel::VeryHigh
    } else if score >= 0.85 {
        ConfidenceLevel::High
    } else if score >= 0.70 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

pub fn confidence_message(score: f64) -> &'static str {
    match confidence_level(score) {
        ConfidenceLevel::VeryHigh => {
            "Very high confidence: data from multiple sources, recently verified"
        }
        ConfidenceLevel::High => "High confidence: data from reliable sources, recently updated",
        ConfidenceLevel::Medium => "Medium confidence: data from 1-2 sources or slightly outdated",
        ConfidenceLevel::Low => "Low confidence: limited data or outdated information",
    }
}

pub fn is_valid_score(score: f64) -> bool {
    (0.0..=1.0).contains(&score)
}
