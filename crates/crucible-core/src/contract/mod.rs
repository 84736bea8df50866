//! Output contracts.
//!
//! A contract is a named, versioned specification for what a generation
//! call must produce: target schema, serialization format, model and
//! temperature overrides, retry budget, and enforcement mode. Contracts
//! are loaded once at process start and looked up by name.

mod registry;
mod schema;

pub use registry::{ContractRegistry, RegisteredContract};
pub use schema::CompiledSchema;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from contract loading and lookup.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Failed to read contract file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Contract not found: '{0}'")]
    NotFound(String),

    #[error("Duplicate contract name: '{0}'")]
    Duplicate(String),

    #[error("Invalid schema in contract '{contract}': {message}")]
    InvalidSchema { contract: String, message: String },

    #[error("Contract validation failed: {0}")]
    ValidationError(String),
}

/// Serialization format a contract expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Structured object, parsed and schema-checked
    #[default]
    Json,

    /// Free text, returned as-is
    Text,
}

/// What happens when output does not conform after all retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Reject non-conforming output
    #[default]
    Strict,

    /// Log the violation and pass the raw output through
    Advisory,
}

/// A named, versioned output specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputContract {
    /// Unique contract name, used for lookup
    pub name: String,

    /// Contract version (semver)
    pub version: String,

    /// Serialization format
    #[serde(default)]
    pub format: OutputFormat,

    /// JSON Schema the parsed output must conform to.
    /// Required when `format` is `json`; ignored for `text`.
    #[serde(default)]
    pub schema: Option<serde_json::Value>,

    /// Capability tag used to select the fallback chain
    #[serde(default = "default_capability")]
    pub capability: String,

    /// Model override for calls under this contract
    #[serde(default)]
    pub model: Option<String>,

    /// Temperature override for calls under this contract
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Completion budget override
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Parse/schema retries before the contract is violated
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Strict rejects; advisory logs and passes through
    #[serde(default)]
    pub mode: EnforcementMode,

    /// Inject the extended-reasoning directive for this contract
    #[serde(default)]
    pub requires_extended_reasoning: bool,
}

fn default_capability() -> String {
    "fast".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

impl OutputContract {
    /// Validate internal consistency before registration.
    pub(crate) fn validate(&self) -> Result<(), ContractError> {
        if self.name.is_empty() {
            return Err(ContractError::ValidationError(
                "contract name must not be empty".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(ContractError::ValidationError(format!(
                "contract '{}': max_retry_attempts must be at least 1",
                self.name
            )));
        }
        if self.format == OutputFormat::Json && self.schema.is_none() {
            return Err(ContractError::ValidationError(format!(
                "contract '{}': json format requires a schema",
                self.name
            )));
        }
        Ok(())
    }
}
