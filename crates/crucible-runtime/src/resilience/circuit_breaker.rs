//! Circuit breaker to isolate failing endpoints.
//!
//! Each endpoint has its own circuit: a saturated or erroring provider
//! cannot starve calls intended for a healthy one. While a circuit is
//! open, availability checks return false immediately and no call is
//! attempted until the reset timeout elapses; then exactly one trial
//! call is allowed, and its outcome decides whether the circuit closes
//! or reopens.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before allowing a trial call (in seconds)
    #[serde(with = "duration_secs")]
    pub reset_timeout: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// State of one endpoint's circuit.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, calls are rejected without being attempted
    Open { opened_at: Instant },

    /// One trial call is in flight; further calls are rejected until
    /// its outcome is recorded
    HalfOpen,
}

/// State change produced by recording a call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// Closed circuit tripped open
    Opened,

    /// Trial call failed, circuit reopened
    Reopened,

    /// Trial call succeeded, circuit closed
    Closed,
}

/// Per-endpoint circuit breaker.
///
/// Endpoints are fully independent: recording an outcome for one never
/// affects another's counters.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether a call to this endpoint may be attempted.
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open here and admits the caller as the single trial; other
    /// callers see false until the trial's outcome is recorded.
    pub fn is_available(&self, endpoint: &str) -> bool {
        {
            let states = self.states.read();
            match states.get(endpoint) {
                Some(CircuitState::Open { opened_at }) => {
                    if opened_at.elapsed() < self.config.reset_timeout {
                        return false;
                    }
                    // Fall through to claim the trial below
                }
                Some(CircuitState::HalfOpen) => return false,
                _ => return true,
            }
        }

        // Re-check under the write lock: only one caller may claim the
        // trial slot.
        let mut states = self.states.write();
        match states.get(endpoint) {
            Some(CircuitState::Open { opened_at })
                if opened_at.elapsed() >= self.config.reset_timeout =>
            {
                states.insert(endpoint.to_string(), CircuitState::HalfOpen);
                tracing::info!(endpoint, "Circuit half-open, admitting trial call");
                true
            }
            Some(CircuitState::Open { .. }) | Some(CircuitState::HalfOpen) => false,
            _ => true,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, endpoint: &str) -> Option<BreakerTransition> {
        let mut states = self.states.write();
        match states.get(endpoint).cloned() {
            Some(CircuitState::HalfOpen) => {
                states.insert(endpoint.to_string(), CircuitState::Closed { failures: 0 });
                tracing::info!(endpoint, "Circuit closed after successful trial");
                Some(BreakerTransition::Closed)
            }
            Some(CircuitState::Closed { .. }) => {
                // Success resets the consecutive-failure counter
                states.insert(endpoint.to_string(), CircuitState::Closed { failures: 0 });
                None
            }
            _ => None,
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, endpoint: &str) -> Option<BreakerTransition> {
        let mut states = self.states.write();
        match states.get(endpoint).cloned() {
            Some(CircuitState::Closed { failures }) => {
                if failures + 1 >= self.config.failure_threshold {
                    states.insert(
                        endpoint.to_string(),
                        CircuitState::Open {
                            opened_at: Instant::now(),
                        },
                    );
                    tracing::warn!(
                        endpoint,
                        failures = failures + 1,
                        "Circuit opened after repeated failures"
                    );
                    Some(BreakerTransition::Opened)
                } else {
                    states.insert(
                        endpoint.to_string(),
                        CircuitState::Closed {
                            failures: failures + 1,
                        },
                    );
                    None
                }
            }
            Some(CircuitState::HalfOpen) => {
                states.insert(
                    endpoint.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(endpoint, "Circuit reopened after failed trial");
                Some(BreakerTransition::Reopened)
            }
            None => {
                if self.config.failure_threshold <= 1 {
                    states.insert(
                        endpoint.to_string(),
                        CircuitState::Open {
                            opened_at: Instant::now(),
                        },
                    );
                    tracing::warn!(endpoint, "Circuit opened on first failure");
                    Some(BreakerTransition::Opened)
                } else {
                    states.insert(endpoint.to_string(), CircuitState::Closed { failures: 1 });
                    None
                }
            }
            _ => None,
        }
    }

    /// Get current state of an endpoint's circuit.
    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.states
            .read()
            .get(endpoint)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
