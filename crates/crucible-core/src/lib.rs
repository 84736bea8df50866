//! # crucible-core
//!
//! Deterministic contract registry and validation model for Crucible.
//!
//! This crate provides the pure half of the system: endpoint and cost
//! configuration, output contracts with compiled schemas, validation
//! finding/report types, the report aggregation rules, and feedback
//! prioritization.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No external calls**: Nothing in this crate performs I/O beyond
//!    loading configuration files
//! 3. **Immutable after load**: Contracts and endpoints never change
//!    for the lifetime of the process
//!
//! All async execution, provider calls, and resilience state live in
//! `crucible-runtime`.

pub mod aggregate;
pub mod contract;
pub mod endpoint;
pub mod feedback;
pub mod types;

// Re-export main types at crate root
pub use contract::{
    CompiledSchema, ContractError, ContractRegistry, EnforcementMode, OutputContract,
    OutputFormat, RegisteredContract,
};
pub use endpoint::ProviderEndpoint;
pub use feedback::{prioritize, FeedbackItem, DEFAULT_MAX_FEEDBACK_ITEMS};
pub use types::{
    SessionStatus, Severity, ValidationFinding, ValidationReport, ValidatorOutcome, Verdict,
};
