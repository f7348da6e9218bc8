/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use chrono::Utc;
use lead_enrich_api::cache::cache_key;
use lead_enrich_api::models::{DataSource, Email, EmailType};
use lead_enrich_api::scoring::{combine_emails, ConfidenceScorer, FindingPayload, SourceFinding};
use lead_enrich_api::validation::{is_valid_email, normalize_domain};
use proptest::prelude::*;
use std::collections::HashSet;

fn email(value: &str, confidence: f64, verified: bool) -> Email {
    Email {
        value: value.to_string(),
        email_type: EmailType::Work,
        source: DataSource::Activity,
        confidence,
        verified,
        last_seen: Utc::now(),
    }
}

fn activity_finding(confidence: f64, age_days: f64, verified: bool) -> SourceFinding {
    SourceFinding::new(
        FindingPayload::Activity {
            emails: vec![email("dev@acme.io", confidence, verified)],
        },
        confidence,
        age_days,
    )
}

fn finding_strategy() -> impl Strategy<Value = SourceFinding> {
    (0.05f64..=1.0, 0.0f64..2000.0, any::<bool>())
        .prop_map(|(confidence, age, verified)| activity_finding(confidence, age, verified))
}

// Property: Score stays within bounds and is zero only without findings
proptest! {
    #[test]
    fn score_is_bounded(findings in prop::collection::vec(finding_strategy(), 0..8)) {
        let score = ConfidenceScorer::default().score(&findings);

        prop_assert!((0.0..=1.0).contains(&score.final_score));
        prop_assert_eq!(score.final_score == 0.0, findings.is_empty());
    }

    #[test]
    fn score_has_two_decimals(findings in prop::collection::vec(finding_strategy(), 1..8)) {
        let score = ConfidenceScorer::default().score(&findings).final_score;
        let scaled = score * 100.0;
        prop_assert!((scaled - scaled.round()).abs() < 1e-6, "not rounded: {}", score);
    }

    #[test]
    fn older_records_never_score_higher(
        confidence in 0.05f64..=1.0,
        age in 0.0f64..1000.0,
        extra in 0.0f64..1000.0
    ) {
        let scorer = ConfidenceScorer::default();
        let fresh = scorer.score(&[activity_finding(confidence, age, false)]);
        let stale = scorer.score(&[activity_finding(confidence, age + extra, false)]);

        prop_assert!(stale.freshness_multiplier <= fresh.freshness_multiplier);
        prop_assert!(stale.final_score <= fresh.final_score);
    }

    #[test]
    fn verification_boost_is_capped(findings in prop::collection::vec(finding_strategy(), 1..8)) {
        let score = ConfidenceScorer::default().score(&findings);
        prop_assert!(score.verification_boosts <= 0.15 + 1e-9);
    }
}

// Property: Email merging
proptest! {
    #[test]
    fn combined_emails_are_unique_ignoring_case(
        entries in prop::collection::vec(
            (prop::sample::select(vec!["a@acme.io", "A@Acme.io", "b@acme.io", "c@corp.dev"]),
             0.0f64..=1.0,
             any::<bool>()),
            0..12
        )
    ) {
        let input: Vec<Email> = entries
            .iter()
            .map(|(value, confidence, verified)| email(value, *confidence, *verified))
            .collect();
        let merged = combine_emails(input.clone());

        let unique: HashSet<&str> = merged.iter().map(|e| e.value.as_str()).collect();
        prop_assert_eq!(unique.len(), merged.len());

        for e in &merged {
            prop_assert_eq!(e.value.clone(), e.value.to_lowercase());
            let best = input
                .iter()
                .filter(|i| i.value.eq_ignore_ascii_case(&e.value))
                .map(|i| i.confidence)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(e.confidence, best);
        }

        for pair in merged.windows(2) {
            prop_assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}

// Property: Validation never panics
proptest! {
    #[test]
    fn email_validation_never_panics(value in "\\PC*") {
        let _ = is_valid_email(&value);
    }

    #[test]
    fn simple_addresses_are_valid(
        local in "[a-z][a-z0-9]{0,20}",
        domain in "[a-z][a-z0-9]{1,15}",
        tld in "[a-z]{2,6}"
    ) {
        let value = format!("{}@{}.{}", local, domain, tld);
        prop_assert!(is_valid_email(&value), "rejected: {}", value);
    }

    #[test]
    fn addresses_without_at_are_invalid(value in "[a-z0-9.]{0,40}") {
        prop_assert!(!is_valid_email(&value));
    }

    #[test]
    fn domain_normalization_drops_www(domain in "[a-vx-z0-9][A-Za-z0-9-]{0,19}\\.[A-Za-z]{2,6}") {
        let bare = normalize_domain(&domain);
        prop_assert_eq!(normalize_domain(&format!("WWW.{}", domain)), bare.clone());
        prop_assert_eq!(bare.clone(), domain.to_lowercase());
    }
}

// Property: Cache key precedence email > handle > domain
proptest! {
    #[test]
    fn cache_key_follows_precedence(
        email in prop::option::of("[a-zA-Z]{1,8}@[a-z]{1,8}\\.io"),
        handle in prop::option::of("[a-zA-Z0-9-]{1,12}"),
        domain in prop::option::of("[a-z]{1,8}\\.com")
    ) {
        let key = cache_key(email.as_deref(), handle.as_deref(), domain.as_deref());

        match (&email, &handle, &domain) {
            (Some(e), _, _) => {
                prop_assert_eq!(key.unwrap(), format!("email:{}", e.to_lowercase()))
            }
            (None, Some(h), _) => {
                prop_assert_eq!(key.unwrap(), format!("handle:{}", h.to_lowercase()))
            }
            (None, None, Some(d)) => prop_assert_eq!(key.unwrap(), format!("domain:{}", d)),
            (None, None, None) => prop_assert!(key.is_err()),
        }
    }
}
