//! Output contract enforcement.
//!
//! Wraps the executor with a schema contract: inject the contract's
//! overrides and format instructions, parse the response, and on a
//! parse or schema failure re-issue the call with an escalating
//! correction hint, up to the contract's retry budget.
//!
//! If output is invalid we retry or reject - we never best-effort
//! parse. Advisory contracts relax only the terminal behavior: after
//! the retry budget is spent, the raw output is logged and passed
//! through instead of rejected.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crucible_core::{ContractError, ContractRegistry, EnforcementMode, OutputFormat, RegisteredContract};

use crate::events::{Event, EventKind, EventSeverity, EventSink};
use crate::executor::{ExecuteError, LogicalRequest, ResilientExecutor};
use crate::prompts;
use crate::providers::ChatMessage;

const COMPONENT: &str = "enforcer";

lazy_static! {
    static ref FENCED_JSON: Regex =
        Regex::new(r"(?s)```(?:json)?\s*(.+?)\s*```").expect("Invalid regex");
}

/// One failed generation attempt, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Raw model output
    pub raw: String,

    /// Why it did not conform
    pub violation: String,
}

/// Errors from contract enforcement.
#[derive(Error, Debug)]
pub enum EnforceError {
    /// Output never conformed within the retry budget. Carries every
    /// attempt's raw output and violation.
    #[error("Output contract '{contract}' violated after {} attempts: {}",
        attempts.len(),
        attempts.last().map(|a| a.violation.as_str()).unwrap_or("no attempts"))]
    Violation {
        contract: String,
        attempts: Vec<AttemptRecord>,
        /// Cost incurred across the failed attempts
        cost: f64,
    },

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// A contract-conformant (or advisory pass-through) generation result.
#[derive(Debug, Clone)]
pub struct Enforced {
    /// Parsed output. For text contracts and advisory pass-through,
    /// a JSON string holding the raw output.
    pub value: serde_json::Value,

    /// Raw model output of the accepted attempt
    pub raw: String,

    /// Attempts consumed, including the accepted one
    pub attempts_used: u32,

    /// Cost accumulated across all attempts in USD
    pub cost: f64,

    /// Endpoint that served the accepted attempt
    pub endpoint: String,

    /// False only for advisory pass-through of non-conforming output
    pub conformant: bool,
}

impl Enforced {
    /// Canonical textual form of the artifact: pretty JSON for
    /// structured output, the raw text otherwise.
    pub fn candidate_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            value => serde_json::to_string_pretty(value).unwrap_or_else(|_| self.raw.clone()),
        }
    }
}

/// Schema-constrained generation through the resilient executor.
pub struct ContractEnforcer {
    executor: Arc<ResilientExecutor>,
    registry: Arc<ContractRegistry>,
    sink: Arc<dyn EventSink>,
}

impl ContractEnforcer {
    /// Create an enforcer.
    pub fn new(
        executor: Arc<ResilientExecutor>,
        registry: Arc<ContractRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            registry,
            sink,
        }
    }

    /// Generate under a contract looked up by name.
    ///
    /// A missing name is a configuration error, surfaced immediately
    /// and never retried.
    pub async fn generate_named(
        &self,
        prompt: &str,
        contract_name: &str,
    ) -> Result<Enforced, EnforceError> {
        let contract = self.registry.get(contract_name)?;
        self.generate(prompt, &contract).await
    }

    /// Generate under a contract.
    pub async fn generate(
        &self,
        prompt: &str,
        contract: &RegisteredContract,
    ) -> Result<Enforced, EnforceError> {
        let spec = &contract.spec;
        let system = prompts::format_instructions(spec);

        let mut violations: Vec<String> = Vec::new();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut total_cost = 0.0;
        let mut last_raw = String::new();
        let mut last_endpoint = String::new();

        for attempt in 1..=spec.max_retry_attempts {
            let user = if violations.is_empty() {
                prompt.to_string()
            } else {
                format!(
                    "{prompt}\n\n{}",
                    prompts::correction_hint(&violations, &last_raw)
                )
            };

            let request = LogicalRequest {
                capability: spec.capability.clone(),
                messages: vec![ChatMessage::system(&system), ChatMessage::user(user)],
                model: spec.model.clone(),
                temperature: spec.temperature,
                max_tokens: spec.max_tokens,
            };

            // Transport-level failures are not parse retries: budget
            // and chain errors surface unmodified.
            let outcome = self.executor.execute(&request).await?;
            total_cost += outcome.cost;
            last_raw = outcome.content.clone();
            last_endpoint = outcome.endpoint.clone();

            match parse_output(&outcome.content, contract) {
                Ok(value) => {
                    return Ok(Enforced {
                        value,
                        raw: outcome.content,
                        attempts_used: attempt,
                        cost: total_cost,
                        endpoint: outcome.endpoint,
                        conformant: true,
                    });
                }
                Err(violation) => {
                    tracing::warn!(
                        contract = %spec.name,
                        attempt,
                        violation = %violation,
                        "Output did not conform to contract"
                    );
                    if attempt < spec.max_retry_attempts {
                        self.sink.emit(
                            Event::new(EventKind::ContractRetry, COMPONENT, EventSeverity::Warn)
                                .endpoint(&outcome.endpoint)
                                .detail(violation.clone()),
                        );
                    }
                    violations.push(violation.clone());
                    attempts.push(AttemptRecord {
                        raw: outcome.content,
                        violation,
                    });
                }
            }
        }

        self.sink.emit(
            Event::new(EventKind::ContractViolated, COMPONENT, EventSeverity::Error)
                .endpoint(&last_endpoint)
                .cost(total_cost)
                .detail(format!(
                    "contract '{}' after {} attempts",
                    spec.name,
                    attempts.len()
                )),
        );

        match spec.mode {
            EnforcementMode::Strict => Err(EnforceError::Violation {
                contract: spec.name.clone(),
                attempts,
                cost: total_cost,
            }),
            EnforcementMode::Advisory => {
                tracing::warn!(
                    contract = %spec.name,
                    attempts = attempts.len(),
                    "Advisory contract not satisfied, passing raw output through"
                );
                Ok(Enforced {
                    value: serde_json::Value::String(last_raw.clone()),
                    raw: last_raw,
                    attempts_used: spec.max_retry_attempts,
                    cost: total_cost,
                    endpoint: last_endpoint,
                    conformant: false,
                })
            }
        }
    }
}

impl std::fmt::Debug for ContractEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractEnforcer")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Parse raw output per the contract's format and schema.
///
/// Returns the violation message on failure, phrased so it can be fed
/// back to the model as a correction hint.
fn parse_output(
    raw: &str,
    contract: &RegisteredContract,
) -> Result<serde_json::Value, String> {
    match contract.spec.format {
        OutputFormat::Text => Ok(serde_json::Value::String(raw.to_string())),
        OutputFormat::Json => {
            let value = extract_json(raw)?;
            contract
                .validate_output(&value)
                .map_err(|errors| errors.join("; "))?;
            Ok(value)
        }
    }
}

/// Extract a JSON value from raw model output.
///
/// Accepts a bare JSON document or one wrapped in a markdown fence;
/// as a last resort, the outermost brace span is tried.
fn extract_json(raw: &str) -> Result<serde_json::Value, String> {
    let trimmed = raw.trim();

    let direct_err = match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(caps) = FENCED_JSON.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            if let Ok(value) = serde_json::from_str(inner.as_str()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(format!("response is not parseable JSON: {direct_err}"))
}
