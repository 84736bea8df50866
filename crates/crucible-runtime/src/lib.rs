//! # crucible-runtime
//!
//! Resilient LLM call execution, contract enforcement, and the
//! refinement loop for Crucible.
//!
//! A caller either receives a validated, schema-conformant artifact or
//! a well-classified failure - never an unvalidated one. The hard part
//! is not the prompts; it is the closed-loop control around every
//! external call:
//!
//! - per-endpoint circuit breakers isolate failing providers
//! - fallback chains advance past tripped or failing endpoints
//! - a budget ledger rejects calls before overrun, never refunds after
//! - one executor composes breaker + chain + budget + timeout for
//!   every external call in the process
//! - the contract enforcer parses and schema-checks output, retrying
//!   with escalating correction hints
//! - the validation orchestrator fans out independent validators and
//!   aggregates one verdict
//! - the refinement loop drives generate -> validate -> refine with a
//!   hard iteration bound
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crucible_core::ContractRegistry;
//! use crucible_runtime::{
//!     ContractEnforcer, RefinementLoop, ResilientExecutor, RuntimeConfig,
//!     TracingSink, ValidationOrchestrator,
//! };
//! use crucible_runtime::providers::ProviderRegistry;
//!
//! let config = RuntimeConfig::from_yaml_file("crucible.yaml")?;
//! let contracts = Arc::new(ContractRegistry::from_yaml_file("contracts.yaml")?);
//! let sink = Arc::new(TracingSink);
//!
//! let executor = Arc::new(ResilientExecutor::new(
//!     &config,
//!     &ProviderRegistry::with_defaults(),
//!     sink.clone(),
//! )?);
//! let enforcer = Arc::new(ContractEnforcer::new(executor, contracts, sink.clone()));
//! let orchestrator = Arc::new(ValidationOrchestrator::new(&config.validation, sink.clone()));
//! let refinement = RefinementLoop::new(enforcer, orchestrator, config.refinement.clone(), sink);
//!
//! let result = refinement.run(task, "design-doc", &validators).await;
//! ```

pub mod config;
pub mod enforcer;
pub mod events;
pub mod executor;
pub mod prompts;
pub mod providers;
pub mod refinement;
pub mod resilience;
pub mod validation;

// Re-export the main surface at crate root
pub use config::{ConfigError, RefinementConfig, RuntimeConfig, ValidationConfig};
pub use enforcer::{AttemptRecord, ContractEnforcer, Enforced, EnforceError};
pub use events::{Event, EventKind, EventSeverity, EventSink, NullSink, TracingSink};
pub use executor::{
    AttemptFailure, BuildError, CallOutcome, ExecuteError, LogicalRequest, ResilientExecutor,
};
pub use providers::{FailureKind, LlmProvider};
pub use refinement::{feedback_schema, IterationRecord, RefinementLoop, SessionResult};
pub use resilience::{
    BreakerTransition, BudgetConfig, BudgetLedger, ChainError, CircuitBreaker,
    CircuitBreakerConfig, CircuitState, FallbackChain,
};
pub use validation::{verdict_schema, LlmValidator, ValidationOrchestrator, Validator, ValidatorError};
