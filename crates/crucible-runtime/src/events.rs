//! Structured event emission.
//!
//! Every significant transition emits one event: call success/failure,
//! breaker trip/reset, budget rejection, contract retry/violation,
//! validation pass/fail, iteration start/end. Emission is
//! fire-and-forget: sinks must not block, and the core never waits on
//! them.

use serde::Serialize;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CallSucceeded,
    CallFailed,
    BreakerOpened,
    BreakerHalfOpen,
    BreakerClosed,
    BudgetRejected,
    ContractRetry,
    ContractViolated,
    ValidationPassed,
    ValidationFailed,
    IterationStarted,
    IterationCompleted,
}

/// How bad it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
}

/// One structured event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Event kind
    pub kind: EventKind,

    /// Component that emitted the event
    pub component: &'static str,

    /// Severity
    pub severity: EventSeverity,

    /// Endpoint involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Measured cost in USD, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    /// Duration in milliseconds, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Score, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Failure classification, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Free-form detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Event {
    /// Create an event with no optional fields set.
    pub fn new(kind: EventKind, component: &'static str, severity: EventSeverity) -> Self {
        Self {
            kind,
            component,
            severity,
            endpoint: None,
            cost: None,
            duration_ms: None,
            score: None,
            error_kind: None,
            detail: None,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn error_kind(mut self, error_kind: impl Into<String>) -> Self {
        self.error_kind = Some(error_kind.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for events.
///
/// Implementations must return quickly; anything expensive belongs on
/// the sink's own queue or task.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: Event);
}

/// Default sink: structured tracing records.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event.severity {
            EventSeverity::Info => tracing::info!(
                kind = ?event.kind,
                component = event.component,
                endpoint = event.endpoint.as_deref(),
                cost = event.cost,
                duration_ms = event.duration_ms,
                score = event.score,
                detail = event.detail.as_deref(),
                "event"
            ),
            EventSeverity::Warn => tracing::warn!(
                kind = ?event.kind,
                component = event.component,
                endpoint = event.endpoint.as_deref(),
                error_kind = event.error_kind.as_deref(),
                detail = event.detail.as_deref(),
                "event"
            ),
            EventSeverity::Error => tracing::error!(
                kind = ?event.kind,
                component = event.component,
                endpoint = event.endpoint.as_deref(),
                error_kind = event.error_kind.as_deref(),
                detail = event.detail.as_deref(),
                "event"
            ),
        }
    }
}

/// Sink that drops everything. Useful in tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}
