//! Validators: independent checkers producing findings and a score.
//!
//! # Isolation contract
//! Each validator operates in isolation:
//! - No shared mutable state between validators
//! - No access to other validators' findings during a pass
//! - Order-insensitive: the aggregate never depends on completion order

mod orchestrator;

pub use orchestrator::ValidationOrchestrator;

#[cfg(test)]
pub(crate) use orchestrator::test_support;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crucible_core::{ValidationFinding, ValidatorOutcome, Verdict};

use crate::enforcer::{ContractEnforcer, EnforceError};
use crate::prompts;

/// Errors from a single validator.
#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error(transparent)]
    Enforce(#[from] EnforceError),

    #[error("Validator returned malformed verdict: {0}")]
    Malformed(String),
}

/// An independent checker for one candidate artifact.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validator name, used in outcomes and events.
    fn name(&self) -> &str;

    /// Evaluate a candidate and report a verdict.
    ///
    /// # Isolation Contract
    /// - MUST NOT access other validators' outcomes
    /// - MUST NOT share state with other validators
    async fn validate(&self, candidate: &str) -> Result<ValidatorOutcome, ValidatorError>;
}

/// Wire shape a validator contract's output must deserialize into.
#[derive(Debug, Deserialize)]
struct VerdictPayload {
    status: Verdict,
    score: f64,
    #[serde(default)]
    findings: Vec<ValidationFinding>,
}

/// JSON Schema for validator verdicts.
///
/// Use this as the `schema` of validator contracts so the enforcer
/// rejects malformed verdicts before they reach aggregation.
pub fn verdict_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["status", "score"],
        "properties": {
            "status": { "enum": ["PASS", "FAIL", "WARNING"] },
            "score": { "type": "number", "minimum": 0, "maximum": 100 },
            "findings": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["severity", "category", "issue"],
                    "properties": {
                        "severity": { "enum": ["CRITICAL", "HIGH", "MEDIUM", "LOW", "INFO"] },
                        "category": { "type": "string" },
                        "location": { "type": ["string", "null"] },
                        "issue": { "type": "string" },
                        "recommendation": { "type": ["string", "null"] },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    }
                }
            }
        }
    })
}

/// A validator backed by a contract-enforced LLM call.
pub struct LlmValidator {
    name: String,
    instructions: String,
    contract_name: String,
    enforcer: Arc<ContractEnforcer>,
}

impl LlmValidator {
    /// Create a validator.
    ///
    /// `instructions` describe what to check; `contract_name` names a
    /// registered contract whose schema matches [`verdict_schema`].
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        contract_name: impl Into<String>,
        enforcer: Arc<ContractEnforcer>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            contract_name: contract_name.into(),
            enforcer,
        }
    }
}

#[async_trait]
impl Validator for LlmValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, candidate: &str) -> Result<ValidatorOutcome, ValidatorError> {
        let started = Instant::now();
        let prompt = prompts::validator_prompt(&self.instructions, candidate);

        let enforced = self
            .enforcer
            .generate_named(&prompt, &self.contract_name)
            .await?;

        let payload: VerdictPayload = serde_json::from_value(enforced.value)
            .map_err(|e| ValidatorError::Malformed(e.to_string()))?;

        Ok(ValidatorOutcome {
            validator: self.name.clone(),
            status: payload.status,
            score: payload.score,
            findings: payload.findings,
            cost: enforced.cost,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for LlmValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmValidator")
            .field("name", &self.name)
            .field("contract", &self.contract_name)
            .finish_non_exhaustive()
    }
}
