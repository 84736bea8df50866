//! Runtime configuration.
//!
//! One immutable [`RuntimeConfig`] is constructed at process start and
//! threaded through constructors. Nothing reads configuration from
//! ambient global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crucible_core::ProviderEndpoint;

use crate::resilience::{BudgetConfig, ChainError, CircuitBreakerConfig, FallbackChain};

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Refinement loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Hard bound on generate/validate iterations per session
    pub max_iterations: u32,

    /// Minimum average validation score to accept a candidate
    pub min_validation_score: f64,

    /// Cap on feedback items fed into regeneration
    pub feedback_max_findings: usize,

    /// Contract used for LLM feedback extraction. When unset, feedback
    /// is derived deterministically from the report's findings.
    #[serde(default)]
    pub feedback_contract: Option<String>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_validation_score: 85.0,
            feedback_max_findings: crucible_core::DEFAULT_MAX_FEEDBACK_ITEMS,
            feedback_contract: None,
        }
    }
}

/// Validation orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Cache validator verdicts for identical candidates
    pub cache_enabled: bool,

    /// Max cached verdicts
    pub cache_capacity: u64,

    /// Verdict time-to-live
    #[serde(with = "humantime_duration")]
    pub cache_ttl: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Callable endpoints
    pub endpoints: Vec<ProviderEndpoint>,

    /// Explicit fallback chains: capability -> ordered endpoint names.
    /// Capabilities without an entry get a derived chain in endpoint
    /// declaration order.
    #[serde(default)]
    pub chains: BTreeMap<String, Vec<String>>,

    /// Provider-type configuration blocks (api keys, base urls),
    /// keyed by provider type
    #[serde(default)]
    pub providers: BTreeMap<String, serde_json::Value>,

    /// Circuit breaker settings, shared by all endpoints
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Budget settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Timeout applied to every external call (e.g., "30s")
    #[serde(default = "default_call_timeout", with = "humantime_duration")]
    pub call_timeout: Duration,

    /// Refinement loop settings
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Validation orchestrator settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

impl RuntimeConfig {
    /// Parse configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Validate cross-references and value ranges.
    ///
    /// Chain construction is the reference check: every configured
    /// chain must resolve to known endpoints with the right tags.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one endpoint is required".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(&endpoint.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
        }

        FallbackChain::new(&self.endpoints, &self.chains)?;

        if self.budget.daily_ceiling_usd <= 0.0 {
            return Err(ConfigError::Invalid(
                "budget.daily_ceiling_usd must be positive".to_string(),
            ));
        }

        if self.refinement.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "refinement.max_iterations must be at least 1".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.refinement.min_validation_score) {
            return Err(ConfigError::Invalid(
                "refinement.min_validation_score must be within 0..=100".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_YAML: &str = r#"
endpoints:
  - name: "sonnet"
    provider: "anthropic"
    model: "claude-sonnet-4-5"
    capabilities: ["fast", "deep-reasoning"]
    input_cost_per_mtok: 3.0
    output_cost_per_mtok: 15.0
  - name: "haiku"
    provider: "anthropic"
    model: "claude-haiku-4-5"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0

chains:
  fast: ["haiku", "sonnet"]

budget:
  daily_ceiling_usd: 25.0

call_timeout: "45s"

refinement:
  max_iterations: 4
  min_validation_score: 80.0
  feedback_max_findings: 5
"#;

    #[test]
    fn parses_full_config() {
        let config = RuntimeConfig::from_yaml(CONFIG_YAML).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.call_timeout, Duration::from_secs(45));
        assert_eq!(config.refinement.max_iterations, 4);
        assert_eq!(config.budget.daily_ceiling_usd, 25.0);
        assert_eq!(config.chains["fast"], vec!["haiku", "sonnet"]);
    }

    #[test]
    fn defaults_apply() {
        let yaml = r#"
endpoints:
  - name: "only"
    provider: "anthropic"
    model: "claude-haiku-4-5"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.refinement.max_iterations, 3);
        assert!(config.validation.cache_enabled);
    }

    #[test]
    fn rejects_empty_endpoints() {
        let result = RuntimeConfig::from_yaml("endpoints: []");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_chain_with_unknown_endpoint() {
        let yaml = r#"
endpoints:
  - name: "only"
    provider: "anthropic"
    model: "m"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
chains:
  fast: ["ghost"]
"#;
        let result = RuntimeConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Chain(_))));
    }

    #[test]
    fn rejects_duplicate_endpoint_names() {
        let yaml = r#"
endpoints:
  - name: "dup"
    provider: "anthropic"
    model: "m1"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
  - name: "dup"
    provider: "anthropic"
    model: "m2"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
"#;
        let result = RuntimeConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_iterations() {
        let yaml = r#"
endpoints:
  - name: "only"
    provider: "anthropic"
    model: "m"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
refinement:
  max_iterations: 0
  min_validation_score: 85.0
  feedback_max_findings: 5
"#;
        let result = RuntimeConfig::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
