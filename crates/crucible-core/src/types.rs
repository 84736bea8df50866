//! Shared validation and session types.
//!
//! Everything here is plain data: created by the runtime, consumed by
//! callers, never mutated after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a single validation finding.
///
/// Declared in ascending order so `severity >= Severity::High` reads
/// naturally and `BTreeMap<Severity, _>` iterates Info through Critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// One issue reported by a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFinding {
    /// How serious the issue is
    pub severity: Severity,

    /// Issue category (e.g., "completeness", "consistency")
    pub category: String,

    /// Where in the candidate the issue was observed
    #[serde(default)]
    pub location: Option<String>,

    /// Human-readable description of the issue
    pub issue: String,

    /// Suggested fix
    #[serde(default)]
    pub recommendation: Option<String>,

    /// Validator confidence in the finding (0.0 - 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Verdict reported by one validator, or aggregated for a whole pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Warning,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Warning => "WARNING",
        };
        write!(f, "{s}")
    }
}

/// Result of running one validator against one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    /// Validator name
    pub validator: String,

    /// Validator-level verdict
    pub status: Verdict,

    /// Numeric quality score (0 - 100)
    pub score: f64,

    /// Findings, worst first is not guaranteed; aggregation sorts
    pub findings: Vec<ValidationFinding>,

    /// Measured cost of this validator's calls in USD
    pub cost: f64,

    /// Wall-clock time the validator took
    pub elapsed_ms: u64,
}

impl ValidatorOutcome {
    /// Outcome representing an infrastructure failure in a validator.
    ///
    /// Per-validator failures never abort the rest of the pass; they
    /// are recorded as a FAIL with zero score.
    pub fn infrastructure_failure(validator: impl Into<String>, reason: impl Into<String>) -> Self {
        let validator = validator.into();
        Self {
            validator: validator.clone(),
            status: Verdict::Fail,
            score: 0.0,
            findings: vec![ValidationFinding {
                severity: Severity::Critical,
                category: "validator-failure".to_string(),
                location: None,
                issue: format!("validator '{validator}' did not complete: {}", reason.into()),
                recommendation: None,
                confidence: 1.0,
            }],
            cost: 0.0,
            elapsed_ms: 0,
        }
    }
}

/// Aggregate of all validator outputs for one candidate.
///
/// Immutable after creation; see [`crate::aggregate::aggregate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Aggregated verdict across all validators
    pub overall_status: Verdict,

    /// Mean of per-validator scores (0 - 100)
    pub average_score: f64,

    /// All findings, grouped by severity
    pub findings_by_severity: BTreeMap<Severity, Vec<ValidationFinding>>,

    /// Total measured cost of the validation pass in USD
    pub total_cost: f64,

    /// Total wall-clock time of the validation pass
    pub elapsed_ms: u64,

    /// Per-validator outcomes the aggregate was built from
    pub outcomes: Vec<ValidatorOutcome>,

    /// When the report was created
    pub evaluated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// All findings at or above a severity, in stable order.
    pub fn findings_at_least(&self, floor: Severity) -> Vec<&ValidationFinding> {
        self.findings_by_severity
            .range(floor..)
            .flat_map(|(_, v)| v.iter())
            .collect()
    }

    /// Count of findings at a given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings_by_severity
            .get(&severity)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Terminal status of a refinement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Validation passed at or above the configured score threshold
    Success,

    /// All iterations completed without passing
    FailedValidation,

    /// The infrastructure could not deliver a call
    Error,
}
