//! Deterministic aggregation of validator outcomes.
//!
//! # Aggregation rules (strict)
//! - FAIL if any validator reports FAIL or any finding is CRITICAL
//! - WARNING if no FAIL/CRITICAL but at least one HIGH finding or a
//!   validator reports WARNING
//! - PASS otherwise
//!
//! These rules are not configurable. They are the policy. Validators
//! influence the verdict through their findings and statuses, never by
//! reinterpreting the aggregation.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::types::{Severity, ValidationFinding, ValidationReport, ValidatorOutcome, Verdict};

/// Fold validator outcomes into a single immutable report.
///
/// Validators are order-insensitive: the same set of outcomes produces
/// the same report regardless of completion order. An empty outcome set
/// aggregates to PASS with a score of 100 (nothing objected).
pub fn aggregate(outcomes: Vec<ValidatorOutcome>, total_cost: f64, elapsed_ms: u64) -> ValidationReport {
    let overall_status = overall_status(&outcomes);
    let average_score = average_score(&outcomes);

    let mut findings_by_severity: BTreeMap<Severity, Vec<ValidationFinding>> = BTreeMap::new();
    for outcome in &outcomes {
        for finding in &outcome.findings {
            findings_by_severity
                .entry(finding.severity)
                .or_default()
                .push(finding.clone());
        }
    }

    ValidationReport {
        overall_status,
        average_score,
        findings_by_severity,
        total_cost,
        elapsed_ms,
        outcomes,
        evaluated_at: Utc::now(),
    }
}

fn overall_status(outcomes: &[ValidatorOutcome]) -> Verdict {
    let any_fail = outcomes.iter().any(|o| {
        o.status == Verdict::Fail
            || o.findings.iter().any(|f| f.severity == Severity::Critical)
    });
    if any_fail {
        return Verdict::Fail;
    }

    let any_warning = outcomes.iter().any(|o| {
        o.status == Verdict::Warning
            || o.findings.iter().any(|f| f.severity == Severity::High)
    });
    if any_warning {
        return Verdict::Warning;
    }

    Verdict::Pass
}

fn average_score(outcomes: &[ValidatorOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 100.0;
    }
    outcomes.iter().map(|o| o.score).sum::<f64>() / outcomes.len() as f64
}


#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;

    fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Info),
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
        ]
    }

    fn arb_outcome() -> impl Strategy<Value = ValidatorOutcome> {
        (
            prop_oneof![Just(Verdict::Pass), Just(Verdict::Fail), Just(Verdict::Warning)],
            0.0f64..=100.0,
            proptest::collection::vec(arb_severity(), 0..4),
        )
            .prop_map(|(status, score, severities)| ValidatorOutcome {
                validator: "v".to_string(),
                status,
                score,
                findings: severities
                    .into_iter()
                    .map(|severity| ValidationFinding {
                        severity,
                        category: "c".to_string(),
                        location: None,
                        issue: "i".to_string(),
                        recommendation: None,
                        confidence: 1.0,
                    })
                    .collect(),
                cost: 0.0,
                elapsed_ms: 0,
            })
    }

    proptest! {
        #[test]
        fn score_stays_in_range(outcomes in proptest::collection::vec(arb_outcome(), 0..6)) {
            let report = aggregate(outcomes, 0.0, 0);
            prop_assert!(report.average_score >= 0.0);
            prop_assert!(report.average_score <= 100.0);
        }

        #[test]
        fn fail_status_implies_fail_evidence(outcomes in proptest::collection::vec(arb_outcome(), 1..6)) {
            let report = aggregate(outcomes.clone(), 0.0, 0);
            if report.overall_status == Verdict::Fail {
                let has_cause = outcomes.iter().any(|o| {
                    o.status == Verdict::Fail
                        || o.findings.iter().any(|f| f.severity == Severity::Critical)
                });
                prop_assert!(has_cause);
            }
        }
    }
}
