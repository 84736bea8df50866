//! Refinement loop: generate, validate, refine, bounded.
//!
//! State machine: GENERATE -> VALIDATE -> {DONE_PASS |
//! EXTRACT_FEEDBACK -> GENERATE | DONE_EXHAUSTED}. A session ends in
//! one of three states: the candidate passed, the iteration budget ran
//! out, or the infrastructure could not deliver a generation call.
//!
//! Feedback is latest-report-only: each regeneration prompt carries the
//! newest report's prioritized findings, since earlier fixes are
//! presumed applied. When LLM feedback extraction is configured and
//! fails, feedback degrades to deterministic prioritization of the
//! report's own findings; a feedback failure never terminates the
//! session.

use serde::Deserialize;
use std::sync::Arc;

use crucible_core::{
    feedback, FeedbackItem, SessionStatus, Severity, ValidationFinding, ValidationReport, Verdict,
};

use crate::config::RefinementConfig;
use crate::enforcer::{ContractEnforcer, EnforceError};
use crate::events::{Event, EventKind, EventSeverity, EventSink};
use crate::prompts;
use crate::validation::{ValidationOrchestrator, Validator};

const COMPONENT: &str = "refinement";

/// One completed iteration: the candidate and its report.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: u32,

    /// Candidate artifact text
    pub candidate: String,

    /// Validation report for the candidate
    pub report: ValidationReport,
}

/// Result of a refinement session.
#[derive(Debug)]
pub struct SessionResult {
    /// Terminal status
    pub status: SessionStatus,

    /// Final candidate: the passing one on success, the best-scoring
    /// one on exhaustion
    pub final_candidate: Option<String>,

    /// Report for the final candidate
    pub final_report: Option<ValidationReport>,

    /// Iterations that completed generation and validation
    pub iterations_used: u32,

    /// Total measured cost of the session in USD
    pub total_cost: f64,

    /// Every (candidate, report) pair, for post-hoc inspection
    pub history: Vec<IterationRecord>,

    /// The terminal error, when status is `Error`
    pub error: Option<EnforceError>,
}

/// Session-local refinement state. Discarded after the session returns.
#[derive(Debug, Default)]
struct RefinementState {
    history: Vec<IterationRecord>,
    best_score: f64,
    best_index: Option<usize>,
}

impl RefinementState {
    fn record(&mut self, iteration: u32, candidate: String, report: ValidationReport) {
        if self.best_index.is_none() || report.average_score > self.best_score {
            self.best_score = report.average_score;
            self.best_index = Some(self.history.len());
        }
        self.history.push(IterationRecord {
            iteration,
            candidate,
            report,
        });
    }

    fn best(&self) -> Option<&IterationRecord> {
        self.best_index.and_then(|i| self.history.get(i))
    }
}

/// Wire shape for LLM-extracted feedback.
#[derive(Debug, Deserialize)]
struct FeedbackPayload {
    items: Vec<FeedbackItem>,
}

/// JSON Schema for feedback extraction contracts.
pub fn feedback_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["items"],
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["severity", "category", "issue"],
                    "properties": {
                        "severity": { "enum": ["CRITICAL", "HIGH", "MEDIUM", "LOW", "INFO"] },
                        "category": { "type": "string" },
                        "issue": { "type": "string" },
                        "recommendation": { "type": ["string", "null"] }
                    }
                }
            }
        }
    })
}

/// Drives generate -> validate -> refine sessions.
pub struct RefinementLoop {
    enforcer: Arc<ContractEnforcer>,
    orchestrator: Arc<ValidationOrchestrator>,
    config: RefinementConfig,
    sink: Arc<dyn EventSink>,
}

impl RefinementLoop {
    /// Create a refinement loop.
    pub fn new(
        enforcer: Arc<ContractEnforcer>,
        orchestrator: Arc<ValidationOrchestrator>,
        config: RefinementConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            enforcer,
            orchestrator,
            config,
            sink,
        }
    }

    /// Run one refinement session.
    ///
    /// Within a session everything is strictly sequential: iteration
    /// i+1 never begins before iteration i's validation is recorded.
    /// Dropping the returned future between iterations abandons the
    /// session; breaker and budget state only mutate on call
    /// completion, so no shared state is left half-updated.
    pub async fn run(
        &self,
        task: &str,
        contract_name: &str,
        validators: &[Arc<dyn Validator>],
    ) -> SessionResult {
        let mut state = RefinementState::default();
        let mut total_cost = 0.0;
        let mut prompt = task.to_string();

        for iteration in 1..=self.config.max_iterations {
            self.sink.emit(
                Event::new(EventKind::IterationStarted, COMPONENT, EventSeverity::Info)
                    .detail(format!("iteration {iteration}")),
            );

            let enforced = match self.enforcer.generate_named(&prompt, contract_name).await {
                Ok(enforced) => enforced,
                Err(error) => {
                    if let EnforceError::Violation { cost, .. } = &error {
                        total_cost += cost;
                    }
                    tracing::error!(
                        iteration,
                        error = %error,
                        "Generation failed, terminating session"
                    );
                    return self.finish_error(state, total_cost, error);
                }
            };
            total_cost += enforced.cost;
            let candidate = enforced.candidate_text();

            let report = self.orchestrator.validate(&candidate, validators).await;
            total_cost += report.total_cost;

            self.sink.emit(
                Event::new(EventKind::IterationCompleted, COMPONENT, EventSeverity::Info)
                    .score(report.average_score)
                    .cost(report.total_cost)
                    .detail(format!("iteration {iteration}: {}", report.overall_status)),
            );

            let passed = report.overall_status == Verdict::Pass
                && report.average_score >= self.config.min_validation_score;

            state.record(iteration, candidate.clone(), report.clone());

            if passed {
                return SessionResult {
                    status: SessionStatus::Success,
                    final_candidate: Some(candidate),
                    final_report: Some(report),
                    iterations_used: state.history.len() as u32,
                    total_cost,
                    history: state.history,
                    error: None,
                };
            }

            if iteration == self.config.max_iterations {
                break;
            }

            let items = self.extract_feedback(&report, &mut total_cost).await;
            prompt = prompts::regeneration_prompt(task, &candidate, &items);
        }

        // Iteration budget exhausted: surface the best-scoring pair
        let (final_candidate, final_report) = match state.best() {
            Some(record) => (Some(record.candidate.clone()), Some(record.report.clone())),
            None => (None, None),
        };

        SessionResult {
            status: SessionStatus::FailedValidation,
            final_candidate,
            final_report,
            iterations_used: state.history.len() as u32,
            total_cost,
            history: state.history,
            error: None,
        }
    }

    fn finish_error(
        &self,
        state: RefinementState,
        total_cost: f64,
        error: EnforceError,
    ) -> SessionResult {
        let (final_candidate, final_report) = match state.best() {
            Some(record) => (Some(record.candidate.clone()), Some(record.report.clone())),
            None => (None, None),
        };

        SessionResult {
            status: SessionStatus::Error,
            final_candidate,
            final_report,
            iterations_used: state.history.len() as u32,
            total_cost,
            history: state.history,
            error: Some(error),
        }
    }

    /// Feedback for the next iteration, latest report only.
    async fn extract_feedback(
        &self,
        report: &ValidationReport,
        total_cost: &mut f64,
    ) -> Vec<FeedbackItem> {
        let cap = self.config.feedback_max_findings;

        if let Some(contract_name) = &self.config.feedback_contract {
            let actionable: Vec<&ValidationFinding> = report.findings_at_least(Severity::High);
            if !actionable.is_empty() {
                match self.llm_feedback(contract_name, &actionable).await {
                    Ok((items, cost)) => {
                        *total_cost += cost;
                        if !items.is_empty() {
                            return items.into_iter().take(cap).collect();
                        }
                    }
                    Err(e) => {
                        *total_cost += e.1;
                        tracing::warn!(
                            error = %e.0,
                            "Feedback extraction failed, using deterministic prioritization"
                        );
                    }
                }
            }
        }

        let all: Vec<ValidationFinding> = report
            .findings_by_severity
            .values()
            .flatten()
            .cloned()
            .collect();
        feedback::prioritize(&all, cap)
    }

    async fn llm_feedback(
        &self,
        contract_name: &str,
        actionable: &[&ValidationFinding],
    ) -> Result<(Vec<FeedbackItem>, f64), (String, f64)> {
        let owned: Vec<ValidationFinding> = actionable.iter().map(|f| (*f).clone()).collect();
        let prompt = prompts::feedback_extraction_prompt(&owned);

        let enforced = self
            .enforcer
            .generate_named(&prompt, contract_name)
            .await
            .map_err(|e| {
                let cost = match &e {
                    EnforceError::Violation { cost, .. } => *cost,
                    _ => 0.0,
                };
                (e.to_string(), cost)
            })?;
        let cost = enforced.cost;

        let payload: FeedbackPayload =
            serde_json::from_value(enforced.value).map_err(|e| (e.to_string(), cost))?;

        let items = payload
            .items
            .into_iter()
            .filter(|item| item.severity >= Severity::High)
            .collect();
        Ok((items, cost))
    }
}

impl std::fmt::Debug for RefinementLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementLoop")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::events::test_support::RecordingSink;
    use crate::events::NullSink;
    use crate::executor::test_support::{two_endpoint_config, ScriptedCall, ScriptedProvider};
    use crate::executor::ResilientExecutor;
    use crate::providers::LlmProvider;
    use crate::validation::test_support::ScriptedValidator;
    use crucible_core::ContractRegistry;
    use std::collections::HashMap;

    const CONTRACTS_YAML: &str = r#"
- name: "artifact"
  version: "1.0"
  format: text
  capability: "fast"
  max_retry_attempts: 1

- name: "feedback"
  version: "1.0"
  format: json
  capability: "fast"
  max_retry_attempts: 1
  schema:
    type: object
    required: ["items"]
    properties:
      items:
        type: array
        items:
          type: object
          required: ["severity", "category", "issue"]
          properties:
            severity: { enum: ["CRITICAL", "HIGH", "MEDIUM", "LOW", "INFO"] }
            category: { type: string }
            issue: { type: string }
            recommendation: { type: ["string", "null"] }
"#;

    struct Harness {
        refinement: RefinementLoop,
        provider_a: Arc<ScriptedProvider>,
    }

    fn harness(
        script_a: Vec<ScriptedCall>,
        script_b: Vec<ScriptedCall>,
        config: RefinementConfig,
        sink: Arc<dyn EventSink>,
    ) -> Harness {
        let runtime_config = two_endpoint_config();
        let provider_a = Arc::new(ScriptedProvider::new(script_a));
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert("mock-a".to_string(), Arc::clone(&provider_a) as _);
        providers.insert("mock-b".to_string(), Arc::new(ScriptedProvider::new(script_b)));

        let executor = Arc::new(
            ResilientExecutor::with_providers(&runtime_config, providers, Arc::clone(&sink))
                .expect("build"),
        );
        let registry = Arc::new(ContractRegistry::from_yaml(CONTRACTS_YAML).expect("contracts"));
        let enforcer = Arc::new(ContractEnforcer::new(
            executor,
            registry,
            Arc::clone(&sink),
        ));
        let orchestrator = Arc::new(ValidationOrchestrator::new(
            &ValidationConfig::default(),
            Arc::clone(&sink),
        ));

        Harness {
            refinement: RefinementLoop::new(enforcer, orchestrator, config, sink),
            provider_a,
        }
    }

    fn config(max_iterations: u32, min_score: f64) -> RefinementConfig {
        RefinementConfig {
            max_iterations,
            min_validation_score: min_score,
            feedback_max_findings: 5,
            feedback_contract: None,
        }
    }

    #[tokio::test]
    async fn passing_first_iteration_succeeds_immediately() {
        let h = harness(
            vec![ScriptedCall::Succeed("draft one".to_string())],
            vec![ScriptedCall::FailTransport],
            config(3, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedValidator::passing("quality", 92.0))];

        let result = h.refinement.run("write a doc", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::Success);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.final_candidate.as_deref(), Some("draft one"));
        assert!(result.total_cost > 0.0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn improving_scores_pass_on_third_iteration() {
        let h = harness(
            vec![
                ScriptedCall::Succeed("draft one".to_string()),
                ScriptedCall::Succeed("draft two".to_string()),
                ScriptedCall::Succeed("draft three".to_string()),
            ],
            vec![ScriptedCall::FailTransport],
            config(3, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(ScriptedValidator::new(
            "quality",
            vec![
                (Verdict::Pass, 70.0, vec![]),
                (Verdict::Pass, 80.0, vec![]),
                (Verdict::Pass, 90.0, vec![]),
            ],
        ))];

        let result = h.refinement.run("write a doc", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::Success);
        assert_eq!(result.iterations_used, 3);
        assert_eq!(result.final_candidate.as_deref(), Some("draft three"));
        let report = result.final_report.unwrap();
        assert!((report.average_score - 90.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhaustion_returns_best_candidate_and_full_history() {
        let h = harness(
            vec![
                ScriptedCall::Succeed("draft one".to_string()),
                ScriptedCall::Succeed("draft two".to_string()),
            ],
            vec![ScriptedCall::FailTransport],
            config(2, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(ScriptedValidator::new(
            "quality",
            vec![
                (Verdict::Pass, 60.0, vec![]),
                (Verdict::Pass, 70.0, vec![]),
            ],
        ))];

        let result = h.refinement.run("write a doc", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::FailedValidation);
        assert_eq!(result.iterations_used, 2);
        assert_eq!(result.history.len(), 2);
        assert_eq!(result.final_candidate.as_deref(), Some("draft two"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn iterations_never_exceed_max() {
        let h = harness(
            vec![ScriptedCall::Succeed("same draft".to_string())],
            vec![ScriptedCall::FailTransport],
            config(3, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(ScriptedValidator::new(
            "quality",
            vec![(Verdict::Fail, 10.0, vec![Severity::Critical])],
        ))];

        let result = h.refinement.run("task", "artifact", &validators).await;
        assert_eq!(result.status, SessionStatus::FailedValidation);
        assert!(result.iterations_used <= 3);
        assert_eq!(result.history.len(), result.iterations_used as usize);
    }

    #[tokio::test]
    async fn generation_failure_terminates_with_error_status() {
        let h = harness(
            vec![ScriptedCall::FailTransport],
            vec![ScriptedCall::FailOverloaded],
            config(3, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedValidator::passing("quality", 90.0))];

        let result = h.refinement.run("task", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::Error);
        assert_eq!(result.iterations_used, 0);
        assert!(result.history.is_empty());
        assert!(result.final_candidate.is_none());
        assert!(matches!(
            result.error,
            Some(EnforceError::Execute(_))
        ));
    }

    #[tokio::test]
    async fn tripped_endpoint_falls_back_within_one_iteration() {
        // Endpoint a is down; b serves the call. The session still
        // succeeds in a single iteration.
        let h = harness(
            vec![ScriptedCall::FailTransport],
            vec![ScriptedCall::Succeed("from b".to_string())],
            config(3, 85.0),
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedValidator::passing("quality", 95.0))];

        let result = h.refinement.run("task", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::Success);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(result.final_candidate.as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn llm_feedback_steers_the_next_iteration() {
        let feedback_json = serde_json::json!({
            "items": [{
                "severity": "HIGH",
                "category": "completeness",
                "issue": "missing the failure-modes section",
                "recommendation": "add one"
            }]
        })
        .to_string();

        let mut cfg = config(2, 85.0);
        cfg.feedback_contract = Some("feedback".to_string());

        let h = harness(
            vec![
                ScriptedCall::Succeed("draft one".to_string()),
                ScriptedCall::Succeed(feedback_json),
                ScriptedCall::Succeed("draft two".to_string()),
            ],
            vec![ScriptedCall::FailTransport],
            cfg,
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(ScriptedValidator::new(
            "quality",
            vec![
                (Verdict::Fail, 50.0, vec![Severity::High]),
                (Verdict::Pass, 90.0, vec![]),
            ],
        ))];

        let result = h.refinement.run("task", "artifact", &validators).await;

        assert_eq!(result.status, SessionStatus::Success);
        assert_eq!(result.iterations_used, 2);
        // generation + feedback + generation
        assert_eq!(h.provider_a.calls(), 3);
    }

    #[tokio::test]
    async fn failed_feedback_extraction_degrades_without_aborting() {
        let mut cfg = config(2, 85.0);
        cfg.feedback_contract = Some("feedback".to_string());

        let h = harness(
            vec![
                ScriptedCall::Succeed("draft one".to_string()),
                // Feedback call returns garbage; the strict feedback
                // contract rejects it after its single attempt
                ScriptedCall::Succeed("not json".to_string()),
                ScriptedCall::Succeed("draft two".to_string()),
            ],
            vec![ScriptedCall::FailTransport],
            cfg,
            Arc::new(NullSink),
        );
        let validators: Vec<Arc<dyn Validator>> = vec![Arc::new(ScriptedValidator::new(
            "quality",
            vec![
                (Verdict::Fail, 40.0, vec![Severity::Critical]),
                (Verdict::Pass, 95.0, vec![]),
            ],
        ))];

        let result = h.refinement.run("task", "artifact", &validators).await;

        // The feedback failure was absorbed; the session completed
        assert_eq!(result.status, SessionStatus::Success);
        assert_eq!(result.iterations_used, 2);
    }

    #[tokio::test]
    async fn emits_iteration_events() {
        let sink = Arc::new(RecordingSink::new());
        let h = harness(
            vec![ScriptedCall::Succeed("draft".to_string())],
            vec![ScriptedCall::FailTransport],
            config(1, 85.0),
            Arc::clone(&sink) as _,
        );
        let validators: Vec<Arc<dyn Validator>> =
            vec![Arc::new(ScriptedValidator::passing("quality", 90.0))];

        h.refinement.run("task", "artifact", &validators).await;

        assert_eq!(sink.count(EventKind::IterationStarted), 1);
        assert_eq!(sink.count(EventKind::IterationCompleted), 1);
    }

    #[test]
    fn feedback_schema_accepts_payload() {
        let schema =
            crucible_core::CompiledSchema::compile("feedback", &feedback_schema()).unwrap();
        let payload = serde_json::json!({
            "items": [{
                "severity": "CRITICAL",
                "category": "correctness",
                "issue": "contradicts the requirements"
            }]
        });
        assert!(schema.validate(&payload).is_ok());
        assert!(schema
            .validate(&serde_json::json!({ "items": "not-a-list" }))
            .is_err());
    }
}
