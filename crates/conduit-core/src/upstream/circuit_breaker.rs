use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: a failed request pushes the failure rate to the threshold
/// - `Open` -> `HalfOpen`: the open timeout has elapsed
/// - `HalfOpen` -> `Closed`: a successful request or health check
/// - `HalfOpen` -> `Open`: a failed request while the failure rate is still at the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// Normal operation, the endpoint is selectable.
    Closed,
    /// Failure rate reached the threshold, the endpoint is skipped.
    Open,
    /// Recovery mode, the endpoint is selectable again.
    HalfOpen,
}

impl CircuitBreakerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Failure-rate circuit breaker for a single endpoint.
///
/// Holds no lock of its own: it lives next to the endpoint's counters inside the
/// endpoint's ledger lock so that recording an outcome and updating the breaker is a
/// single critical section. The open -> half-open transition is evaluated lazily
/// whenever the state is read, so no timer task is needed.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    opened_at: Option<Instant>,
    /// Failure rate in `(0, 1]` that opens the circuit.
    threshold: f64,
    /// Time to wait in `Open` before transitioning to `HalfOpen`.
    timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: f64, timeout: Duration) -> Self {
        Self { state: CircuitBreakerState::Closed, opened_at: None, threshold, timeout }
    }

    /// Returns the current state, first applying an expired open timeout.
    pub fn state(&mut self) -> CircuitBreakerState {
        if self.state == CircuitBreakerState::Open &&
            self.opened_at.is_some_and(|opened| opened.elapsed() >= self.timeout)
        {
            self.state = CircuitBreakerState::HalfOpen;
            tracing::info!("circuit breaker transitioning to half-open state");
        }
        self.state
    }

    /// Returns `true` if the endpoint may be selected.
    pub fn is_available(&mut self) -> bool {
        self.state() != CircuitBreakerState::Open
    }

    /// Records a success. Returns `true` if the breaker closed as a result.
    pub fn on_success(&mut self) -> bool {
        if self.state() == CircuitBreakerState::HalfOpen {
            self.state = CircuitBreakerState::Closed;
            self.opened_at = None;
            return true;
        }
        false
    }

    /// Records a failure given the endpoint's failure rate after the failure was counted.
    ///
    /// Returns `true` if the breaker opened as a result.
    pub fn on_failure(&mut self, failure_rate: f64) -> bool {
        if self.state() == CircuitBreakerState::Open {
            return false;
        }

        if failure_rate >= self.threshold {
            self.state = CircuitBreakerState::Open;
            self.opened_at = Some(Instant::now());
            tracing::warn!(
                failure_rate,
                threshold = self.threshold,
                "circuit breaker opened after reaching failure threshold"
            );
            return true;
        }
        false
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
