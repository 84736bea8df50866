//! Resilient call executor.
//!
//! The single choke point through which every external call passes.
//! Composes the fallback chain, circuit breaker, budget ledger, and a
//! per-call timeout into one primitive:
//!
//! select endpoint -> reserve budget -> timed call ->
//!   success: commit cost, record success
//!   failure: classify, release reservation, record failure, advance
//!
//! Retries are bounded by chain length; a budget rejection is terminal
//! and never advances the chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crucible_core::ProviderEndpoint;

use crate::config::RuntimeConfig;
use crate::events::{Event, EventKind, EventSeverity, EventSink};
use crate::providers::{
    ChatMessage, CompletionConfig, FailureKind, LlmProvider, ProviderError, ProviderRegistry,
    TokenUsage,
};
use crate::resilience::{
    BreakerTransition, BudgetLedger, ChainError, CircuitBreaker, FallbackChain,
};

const COMPONENT: &str = "executor";

/// One endpoint attempt that failed, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// Endpoint that was tried
    pub endpoint: String,

    /// Failure classification
    pub kind: FailureKind,

    /// Provider-reported detail
    pub message: String,
}

/// Errors from call execution.
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// Every candidate in the chain failed or was unavailable.
    /// Terminal for this logical call, never for the process.
    #[error("All providers exhausted for capability '{capability}' ({} attempted)", attempts.len())]
    ProvidersExhausted {
        capability: String,
        attempts: Vec<AttemptFailure>,
    },

    /// The estimated cost does not fit in the remaining budget.
    /// Non-retryable; does not fall back.
    #[error("Budget exceeded: estimated ${estimated:.4} against ${remaining:.4} remaining")]
    BudgetExceeded { estimated: f64, remaining: f64 },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors from executor construction.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("No provider registered for type '{provider}' (endpoint '{endpoint}')")]
    MissingProvider { provider: String, endpoint: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Provider construction failed: {0}")]
    Provider(#[from] ProviderError),
}

/// A logical request, independent of which endpoint serves it.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    /// Required capability tag, selects the fallback chain
    pub capability: String,

    /// Conversation to send
    pub messages: Vec<ChatMessage>,

    /// Model override; endpoint default when unset
    pub model: Option<String>,

    /// Temperature override; 0.0 when unset
    pub temperature: Option<f32>,

    /// Completion budget override; endpoint default when unset
    pub max_tokens: Option<u32>,
}

impl LogicalRequest {
    /// A request with no overrides.
    pub fn new(capability: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            capability: capability.into(),
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A completed call with its measured cost.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// Generated content
    pub content: String,

    /// Endpoint that served the call
    pub endpoint: String,

    /// Model that generated the response
    pub model: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Measured cost in USD
    pub cost: f64,

    /// Wall-clock latency
    pub latency_ms: u64,
}

/// The resilient call executor.
pub struct ResilientExecutor {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    chain: FallbackChain,
    breaker: CircuitBreaker,
    budget: BudgetLedger,
    call_timeout: Duration,
    sink: Arc<dyn EventSink>,
}

impl ResilientExecutor {
    /// Build an executor, resolving each endpoint's provider type
    /// through the registry.
    pub fn new(
        config: &RuntimeConfig,
        registry: &ProviderRegistry,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, BuildError> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let empty = serde_json::json!({});

        for endpoint in &config.endpoints {
            if providers.contains_key(&endpoint.provider) {
                continue;
            }
            if !registry.has_provider(&endpoint.provider) {
                return Err(BuildError::MissingProvider {
                    provider: endpoint.provider.clone(),
                    endpoint: endpoint.name.clone(),
                });
            }
            let provider_config = config.providers.get(&endpoint.provider).unwrap_or(&empty);
            let provider = registry.create(&endpoint.provider, provider_config)?;
            providers.insert(endpoint.provider.clone(), provider);
        }

        Self::assemble(config, providers, sink)
    }

    /// Build an executor with pre-constructed providers, keyed by
    /// provider type. Useful for tests and embedding.
    pub fn with_providers(
        config: &RuntimeConfig,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, BuildError> {
        for endpoint in &config.endpoints {
            if !providers.contains_key(&endpoint.provider) {
                return Err(BuildError::MissingProvider {
                    provider: endpoint.provider.clone(),
                    endpoint: endpoint.name.clone(),
                });
            }
        }
        Self::assemble(config, providers, sink)
    }

    fn assemble(
        config: &RuntimeConfig,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, BuildError> {
        let chain = FallbackChain::new(&config.endpoints, &config.chains)?;

        Ok(Self {
            providers,
            chain,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            budget: BudgetLedger::new(config.budget.daily_ceiling_usd),
            call_timeout: config.call_timeout,
            sink,
        })
    }

    /// Execute a logical request against the first healthy candidate.
    pub async fn execute(&self, request: &LogicalRequest) -> Result<CallOutcome, ExecuteError> {
        let candidates = self.chain.candidates(&request.capability)?;
        let mut attempts: Vec<AttemptFailure> = Vec::new();

        for endpoint in candidates {
            if !self.breaker.is_available(&endpoint.name) {
                tracing::debug!(endpoint = %endpoint.name, "Skipping endpoint: circuit open");
                continue;
            }

            let Some(provider) = self.providers.get(&endpoint.provider) else {
                tracing::error!(
                    endpoint = %endpoint.name,
                    provider = %endpoint.provider,
                    "No provider instance for endpoint"
                );
                continue;
            };

            let completion = self.completion_config(request, endpoint);
            let prompt_text: String = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let prompt_tokens = provider.estimate_tokens(&prompt_text);
            let estimated = endpoint.estimate_cost(prompt_tokens, completion.max_tokens);

            if !self.budget.reserve(estimated) {
                let remaining = self.budget.remaining();
                self.sink.emit(
                    Event::new(EventKind::BudgetRejected, COMPONENT, EventSeverity::Warn)
                        .endpoint(&endpoint.name)
                        .cost(estimated)
                        .detail(format!("${remaining:.4} remaining")),
                );
                return Err(ExecuteError::BudgetExceeded {
                    estimated,
                    remaining,
                });
            }

            let started = Instant::now();
            let result = tokio::time::timeout(
                completion.timeout,
                provider.complete(request.messages.clone(), &completion),
            )
            .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let (kind, message) = match result {
                Ok(Ok(response)) => {
                    let cost = endpoint
                        .actual_cost(response.usage.prompt_tokens, response.usage.completion_tokens);
                    self.budget.commit(estimated, cost);
                    self.emit_transition(&endpoint.name, self.breaker.record_success(&endpoint.name));
                    self.sink.emit(
                        Event::new(EventKind::CallSucceeded, COMPONENT, EventSeverity::Info)
                            .endpoint(&endpoint.name)
                            .cost(cost)
                            .duration_ms(latency_ms),
                    );
                    return Ok(CallOutcome {
                        content: response.content,
                        endpoint: endpoint.name.clone(),
                        model: response.model,
                        usage: response.usage,
                        cost,
                        latency_ms,
                    });
                }
                Ok(Err(e)) => (e.kind(), e.to_string()),
                Err(_) => (
                    FailureKind::Timeout,
                    format!("no response within {:?}", completion.timeout),
                ),
            };

            // Failure: nothing is committed, the reservation is
            // released and the chain advances.
            self.budget.release(estimated);
            self.emit_transition(&endpoint.name, self.breaker.record_failure(&endpoint.name));
            self.sink.emit(
                Event::new(EventKind::CallFailed, COMPONENT, EventSeverity::Warn)
                    .endpoint(&endpoint.name)
                    .duration_ms(latency_ms)
                    .error_kind(kind.to_string())
                    .detail(message.clone()),
            );
            tracing::warn!(
                endpoint = %endpoint.name,
                kind = %kind,
                error = %message,
                "Call failed, advancing fallback chain"
            );
            attempts.push(AttemptFailure {
                endpoint: endpoint.name.clone(),
                kind,
                message,
            });
        }

        Err(ExecuteError::ProvidersExhausted {
            capability: request.capability.clone(),
            attempts,
        })
    }

    fn completion_config(
        &self,
        request: &LogicalRequest,
        endpoint: &ProviderEndpoint,
    ) -> CompletionConfig {
        CompletionConfig {
            model: request.model.clone().unwrap_or_else(|| endpoint.model.clone()),
            max_tokens: request.max_tokens.unwrap_or(endpoint.max_tokens),
            temperature: request.temperature.unwrap_or(0.0),
            timeout: self.call_timeout,
            prompt_caching: true,
        }
    }

    fn emit_transition(&self, endpoint: &str, transition: Option<BreakerTransition>) {
        let Some(transition) = transition else { return };
        let (kind, severity) = match transition {
            BreakerTransition::Opened | BreakerTransition::Reopened => {
                (EventKind::BreakerOpened, EventSeverity::Warn)
            }
            BreakerTransition::Closed => (EventKind::BreakerClosed, EventSeverity::Info),
        };
        self.sink
            .emit(Event::new(kind, COMPONENT, severity).endpoint(endpoint));
    }

    /// Remaining budget headroom in USD.
    pub fn budget_remaining(&self) -> f64 {
        self.budget.remaining()
    }

    /// Committed spend for the current accounting day.
    pub fn budget_spent(&self) -> f64 {
        self.budget.spent()
    }

    /// Current breaker state for an endpoint.
    pub fn breaker_state(&self, endpoint: &str) -> crate::resilience::CircuitState {
        self.breaker.state(endpoint)
    }
}

impl std::fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("chain", &self.chain)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::providers::CompletionResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// What a scripted provider does on one call.
    #[derive(Clone)]
    pub enum ScriptedCall {
        Succeed(String),
        FailTransport,
        FailRateLimited,
        FailOverloaded,
        Hang,
    }

    /// Mock provider that follows a per-call script, repeating the
    /// last entry once exhausted.
    pub struct ScriptedProvider {
        script: Mutex<Vec<ScriptedCall>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<ScriptedCall>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(call: ScriptedCall) -> Self {
            Self::new(vec![call])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let step = {
                let script = self.script.lock();
                script
                    .get(index)
                    .or_else(|| script.last())
                    .cloned()
                    .unwrap_or(ScriptedCall::FailTransport)
            };

            match step {
                ScriptedCall::Succeed(content) => Ok(CompletionResponse {
                    content,
                    usage: TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 50,
                        cache_read_tokens: 0,
                        cache_creation_tokens: 0,
                    },
                    model: "scripted".to_string(),
                    stop_reason: Some("end_turn".to_string()),
                }),
                ScriptedCall::FailTransport => {
                    Err(ProviderError::HttpError("connection reset".to_string()))
                }
                ScriptedCall::FailRateLimited => {
                    Err(ProviderError::RateLimited { retry_after: None })
                }
                ScriptedCall::FailOverloaded => {
                    Err(ProviderError::Overloaded("overloaded".to_string()))
                }
                ScriptedCall::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::HttpError("unreachable".to_string()))
                }
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Config with two endpoints "a" (provider "mock-a") and "b"
    /// (provider "mock-b"), both serving "fast".
    pub fn two_endpoint_config() -> RuntimeConfig {
        let yaml = r#"
endpoints:
  - name: "a"
    provider: "mock-a"
    model: "model-a"
    capabilities: ["fast"]
    input_cost_per_mtok: 3.0
    output_cost_per_mtok: 15.0
    max_tokens: 256
  - name: "b"
    provider: "mock-b"
    model: "model-b"
    capabilities: ["fast"]
    input_cost_per_mtok: 1.0
    output_cost_per_mtok: 5.0
    max_tokens: 256
budget:
  daily_ceiling_usd: 10.0
call_timeout: "250ms"
circuit_breaker:
  failure_threshold: 3
  reset_timeout: 30
"#;
        RuntimeConfig::from_yaml(yaml).expect("test config")
    }
}
