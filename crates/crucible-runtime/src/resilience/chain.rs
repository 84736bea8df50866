//! Fallback chains: ordered endpoint candidates per capability.
//!
//! Chain order is configuration, not a side effect of runtime state.
//! Given the same config, the same capability always yields the same
//! candidate order; runtime health only decides which candidates get
//! skipped, never their order.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crucible_core::ProviderEndpoint;

/// Errors from chain construction and lookup.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("No fallback chain serves capability '{0}'")]
    UnknownCapability(String),

    #[error("Chain '{chain}' references unknown endpoint '{endpoint}'")]
    UnknownEndpoint { chain: String, endpoint: String },

    #[error("Endpoint '{endpoint}' in chain '{chain}' does not declare capability '{chain}'")]
    MissingCapability { chain: String, endpoint: String },
}

/// Ordered endpoint candidates per capability tag.
pub struct FallbackChain {
    chains: BTreeMap<String, Vec<Arc<ProviderEndpoint>>>,
}

impl FallbackChain {
    /// Build chains from endpoint definitions and explicit chain
    /// configuration.
    ///
    /// Explicitly configured chains are checked against the endpoint
    /// list and capability tags. Capabilities with no explicit chain
    /// get a derived one: every endpoint declaring the tag, in
    /// declaration order.
    pub fn new(
        endpoints: &[ProviderEndpoint],
        configured: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, ChainError> {
        let by_name: BTreeMap<&str, Arc<ProviderEndpoint>> = endpoints
            .iter()
            .map(|e| (e.name.as_str(), Arc::new(e.clone())))
            .collect();

        let mut chains: BTreeMap<String, Vec<Arc<ProviderEndpoint>>> = BTreeMap::new();

        for (capability, names) in configured {
            let mut resolved = Vec::with_capacity(names.len());
            for name in names {
                let endpoint =
                    by_name
                        .get(name.as_str())
                        .ok_or_else(|| ChainError::UnknownEndpoint {
                            chain: capability.clone(),
                            endpoint: name.clone(),
                        })?;
                if !endpoint.has_capability(capability) {
                    return Err(ChainError::MissingCapability {
                        chain: capability.clone(),
                        endpoint: name.clone(),
                    });
                }
                resolved.push(Arc::clone(endpoint));
            }
            chains.insert(capability.clone(), resolved);
        }

        // Derived chains for capabilities without explicit config
        for endpoint in endpoints {
            for capability in &endpoint.capabilities {
                if configured.contains_key(capability) {
                    continue;
                }
                chains
                    .entry(capability.clone())
                    .or_default()
                    .push(Arc::new(endpoint.clone()));
            }
        }

        Ok(Self { chains })
    }

    /// Candidates for a capability, in configured order.
    pub fn candidates(&self, capability: &str) -> Result<&[Arc<ProviderEndpoint>], ChainError> {
        self.chains
            .get(capability)
            .map(|v| v.as_slice())
            .ok_or_else(|| ChainError::UnknownCapability(capability.to_string()))
    }

    /// Capabilities with at least one candidate.
    pub fn capabilities(&self) -> Vec<&str> {
        self.chains.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let summary: BTreeMap<&str, Vec<&str>> = self
            .chains
            .iter()
            .map(|(cap, eps)| {
                (
                    cap.as_str(),
                    eps.iter().map(|e| e.name.as_str()).collect(),
                )
            })
            .collect();
        f.debug_struct("FallbackChain").field("chains", &summary).finish()
    }
}
