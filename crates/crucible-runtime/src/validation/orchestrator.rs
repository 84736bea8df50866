//! Validation orchestrator: concurrent fan-out, deterministic fan-in.
//!
//! Runs every configured validator against a candidate and aggregates
//! their outcomes into one report. A validator that errors (transport,
//! contract violation, malformed verdict) is recorded as a
//! validator-level FAIL with zero score; it never aborts the others.

use futures::future::join_all;
use moka::future::Cache;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use crucible_core::{aggregate, ValidationReport, ValidatorOutcome, Verdict};

use crate::config::ValidationConfig;
use crate::events::{Event, EventKind, EventSeverity, EventSink};

use super::Validator;

const COMPONENT: &str = "validation";

/// Cache key for validator verdicts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VerdictKey {
    candidate_hash: u64,
    validator: String,
}

impl VerdictKey {
    fn new(candidate: &str, validator: &str) -> Self {
        Self {
            candidate_hash: hash_candidate(candidate),
            validator: validator.to_string(),
        }
    }
}

fn hash_candidate(candidate: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    candidate.hash(&mut hasher);
    hasher.finish()
}

/// Runs validators and aggregates their findings into one verdict.
pub struct ValidationOrchestrator {
    sink: Arc<dyn EventSink>,
    cache: Option<Cache<VerdictKey, ValidatorOutcome>>,
}

impl ValidationOrchestrator {
    /// Create an orchestrator.
    pub fn new(config: &ValidationConfig, sink: Arc<dyn EventSink>) -> Self {
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl)
                .build()
        });

        Self { sink, cache }
    }

    /// Validate a candidate with every validator in the set.
    ///
    /// Validators run concurrently and are order-insensitive; the
    /// report is deterministic for a given set of outcomes.
    pub async fn validate(
        &self,
        candidate: &str,
        validators: &[Arc<dyn Validator>],
    ) -> ValidationReport {
        let started = Instant::now();

        let outcomes: Vec<ValidatorOutcome> = join_all(
            validators
                .iter()
                .map(|validator| self.run_one(candidate, Arc::clone(validator))),
        )
        .await;

        let total_cost = outcomes.iter().map(|o| o.cost).sum();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let report = aggregate::aggregate(outcomes, total_cost, elapsed_ms);

        let (kind, severity) = match report.overall_status {
            Verdict::Pass => (EventKind::ValidationPassed, EventSeverity::Info),
            Verdict::Warning => (EventKind::ValidationPassed, EventSeverity::Warn),
            Verdict::Fail => (EventKind::ValidationFailed, EventSeverity::Warn),
        };
        self.sink.emit(
            Event::new(kind, COMPONENT, severity)
                .score(report.average_score)
                .cost(report.total_cost)
                .duration_ms(report.elapsed_ms),
        );

        report
    }

    async fn run_one(&self, candidate: &str, validator: Arc<dyn Validator>) -> ValidatorOutcome {
        let key = VerdictKey::new(candidate, validator.name());

        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(&key).await {
                tracing::debug!(validator = validator.name(), "Verdict cache hit");
                return cached;
            }
        }

        let outcome = match validator.validate(candidate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    validator = validator.name(),
                    error = %e,
                    "Validator failed, recording zero-score FAIL"
                );
                return ValidatorOutcome::infrastructure_failure(validator.name(), e.to_string());
            }
        };

        if let Some(cache) = &self.cache {
            cache.insert(key, outcome.clone()).await;
        }

        outcome
    }
}

impl std::fmt::Debug for ValidationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationOrchestrator")
            .field("cache_enabled", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::validation::ValidatorError;
    use async_trait::async_trait;
    use crucible_core::{Severity, ValidationFinding};
    use parking_lot::Mutex;

    /// Validator that replays scripted outcomes, one per call, then
    /// repeats the last.
    pub struct ScriptedValidator {
        name: String,
        script: Mutex<Vec<(Verdict, f64, Vec<Severity>)>>,
        calls: Mutex<u32>,
    }

    impl ScriptedValidator {
        pub fn new(name: &str, script: Vec<(Verdict, f64, Vec<Severity>)>) -> Self {
            Self {
                name: name.to_string(),
                script: Mutex::new(script),
                calls: Mutex::new(0),
            }
        }

        pub fn passing(name: &str, score: f64) -> Self {
            Self::new(name, vec![(Verdict::Pass, score, vec![])])
        }

        pub fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Validator for ScriptedValidator {
        fn name(&self) -> &str {
            &self.name
        }

        async fn validate(&self, _candidate: &str) -> Result<ValidatorOutcome, ValidatorError> {
            let index = {
                let mut calls = self.calls.lock();
                let i = *calls as usize;
                *calls += 1;
                i
            };
            let (status, score, severities) = {
                let script = self.script.lock();
                script
                    .get(index)
                    .or_else(|| script.last())
                    .cloned()
                    .unwrap_or((Verdict::Pass, 100.0, vec![]))
            };

            Ok(ValidatorOutcome {
                validator: self.name.clone(),
                status,
                score,
                findings: severities
                    .into_iter()
                    .map(|severity| ValidationFinding {
                        severity,
                        category: "scripted".to_string(),
                        location: None,
                        issue: format!("{severity} finding from {}", self.name),
                        recommendation: Some("address the finding".to_string()),
                        confidence: 0.9,
                    })
                    .collect(),
                cost: 0.001,
                elapsed_ms: 1,
            })
        }
    }

    /// Validator that always errors, simulating infrastructure failure.
    pub struct BrokenValidator;

    #[async_trait]
    impl Validator for BrokenValidator {
        fn name(&self) -> &str {
            "broken"
        }

        async fn validate(&self, _candidate: &str) -> Result<ValidatorOutcome, ValidatorError> {
            Err(ValidatorError::Malformed("simulated failure".to_string()))
        }
    }
}
