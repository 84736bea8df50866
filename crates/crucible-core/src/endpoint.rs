//! Provider endpoint configuration.
//!
//! A [`ProviderEndpoint`] identifies one (provider, model, tier) triple.
//! Endpoints are loaded once from configuration and shared read-only;
//! all runtime state about an endpoint (breaker state, spend) lives
//! elsewhere, keyed by the endpoint name.

use serde::{Deserialize, Serialize};

/// One callable (provider, model, tier) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Unique endpoint name (e.g., "anthropic-sonnet")
    pub name: String,

    /// Provider type, resolved through the provider registry
    /// (e.g., "anthropic")
    pub provider: String,

    /// Model identifier passed to the provider
    pub model: String,

    /// Capability tags this endpoint serves (e.g., "fast",
    /// "deep-reasoning")
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Input cost in USD per million tokens
    pub input_cost_per_mtok: f64,

    /// Output cost in USD per million tokens
    pub output_cost_per_mtok: f64,

    /// Default completion budget for calls to this endpoint
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Inject the extended-reasoning directive for this endpoint.
    ///
    /// Resolved here, at configuration time, never by matching a role
    /// name at call time.
    #[serde(default)]
    pub requires_extended_reasoning: bool,
}

fn default_max_tokens() -> u32 {
    1024
}

impl ProviderEndpoint {
    /// Whether this endpoint serves a capability tag.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Worst-case cost estimate for a call, used for budget reservation.
    ///
    /// Assumes the full completion budget is consumed; the actual cost
    /// committed after the call is usually lower.
    pub fn estimate_cost(&self, prompt_tokens: u32, max_output_tokens: u32) -> f64 {
        self.cost(prompt_tokens, max_output_tokens)
    }

    /// Measured cost of a completed call.
    pub fn actual_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        self.cost(prompt_tokens, completion_tokens)
    }

    fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_mtok;
        let output = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_mtok;
        input + output
    }
}
