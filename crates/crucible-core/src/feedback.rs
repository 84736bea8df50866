//! Feedback prioritization for the refinement loop.
//!
//! Only CRITICAL and HIGH findings steer regeneration; lower severities
//! are noise at regeneration time. The list is bounded so the
//! regeneration prompt stays focused on the few issues that matter.

use serde::{Deserialize, Serialize};

use crate::types::{Severity, ValidationFinding};

/// Default cap on feedback items per iteration.
pub const DEFAULT_MAX_FEEDBACK_ITEMS: usize = 5;

/// One actionable instruction for the next generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Severity of the underlying finding
    pub severity: Severity,

    /// Issue category
    pub category: String,

    /// What is wrong
    pub issue: String,

    /// What to do about it
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl From<&ValidationFinding> for FeedbackItem {
    fn from(finding: &ValidationFinding) -> Self {
        Self {
            severity: finding.severity,
            category: finding.category.clone(),
            issue: finding.issue.clone(),
            recommendation: finding.recommendation.clone(),
        }
    }
}

/// Filter findings to actionable feedback: CRITICAL/HIGH only, most
/// severe first, highest confidence breaking ties, capped at `cap`.
///
/// Deterministic: the same findings always produce the same feedback,
/// so the regeneration prompt built from it is reproducible.
pub fn prioritize(findings: &[ValidationFinding], cap: usize) -> Vec<FeedbackItem> {
    let mut actionable: Vec<&ValidationFinding> = findings
        .iter()
        .filter(|f| f.severity >= Severity::High)
        .collect();

    actionable.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.confidence.total_cmp(&a.confidence))
    });

    actionable
        .into_iter()
        .take(cap)
        .map(FeedbackItem::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, confidence: f64, issue: &str) -> ValidationFinding {
        ValidationFinding {
            severity,
            category: "test".to_string(),
            location: None,
            issue: issue.to_string(),
            recommendation: Some(format!("fix: {issue}")),
            confidence,
        }
    }

    #[test]
    fn filters_below_high() {
        let findings = vec![
            finding(Severity::Critical, 0.9, "broken schema"),
            finding(Severity::Medium, 0.9, "wordy"),
            finding(Severity::Low, 0.9, "style"),
            finding(Severity::High, 0.9, "missing section"),
        ];

        let feedback = prioritize(&findings, 10);
        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].severity, Severity::Critical);
        assert_eq!(feedback[1].severity, Severity::High);
    }

    #[test]
    fn confidence_breaks_ties() {
        let findings = vec![
            finding(Severity::High, 0.5, "weak"),
            finding(Severity::High, 0.95, "strong"),
        ];

        let feedback = prioritize(&findings, 10);
        assert_eq!(feedback[0].issue, "strong");
        assert_eq!(feedback[1].issue, "weak");
    }

    #[test]
    fn respects_cap() {
        let findings: Vec<_> = (0..10)
            .map(|i| finding(Severity::Critical, 0.9, &format!("issue {i}")))
            .collect();

        let feedback = prioritize(&findings, 3);
        assert_eq!(feedback.len(), 3);
    }

    #[test]
    fn deterministic_for_same_input() {
        let findings = vec![
            finding(Severity::Critical, 0.8, "a"),
            finding(Severity::High, 0.9, "b"),
            finding(Severity::High, 0.7, "c"),
        ];

        let first = prioritize(&findings, 5);
        let second = prioritize(&findings, 5);
        let issues =
            |items: &[FeedbackItem]| items.iter().map(|i| i.issue.clone()).collect::<Vec<_>>();
        assert_eq!(issues(&first), issues(&second));
    }

    #[test]
    fn empty_findings_empty_feedback() {
        assert!(prioritize(&[], DEFAULT_MAX_FEEDBACK_ITEMS).is_empty());
    }
}
