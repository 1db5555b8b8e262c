use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;

use crate::{
    types::EndpointConfig,
    upstream::circuit_breaker::{CircuitBreaker, CircuitBreakerState},
};

/// Point-in-time view of one endpoint's health ledger.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub name: String,
    pub url: String,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Running mean over successful requests.
    pub average_response_time_ms: f64,
    /// `failed_requests / total_requests`, `0.0` before the first request.
    pub failure_rate: f64,
    pub circuit_state: CircuitBreakerState,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Mutable per-endpoint counters plus the breaker they drive.
#[derive(Debug)]
struct EndpointLedger {
    active_connections: usize,
    total_requests: u64,
    failed_requests: u64,
    successful_requests: u64,
    average_response_time_ms: f64,
    last_used_at: Option<DateTime<Utc>>,
    circuit_breaker: CircuitBreaker,
}

impl EndpointLedger {
    fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.failed_requests as f64 / self.total_requests as f64;
        rate.clamp(0.0, 1.0)
    }
}

/// A configured remote endpoint and its health ledger.
///
/// Every request outcome goes through [`Endpoint::record_success`] or
/// [`Endpoint::record_failure`], each of which updates counters and the circuit breaker
/// under one lock.
pub struct Endpoint {
    config: EndpointConfig,
    ledger: Mutex<EndpointLedger>,
}

impl Endpoint {
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        let circuit_breaker =
            CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_timeout);
        Self {
            config,
            ledger: Mutex::new(EndpointLedger {
                active_connections: 0,
                total_requests: 0,
                failed_requests: 0,
                successful_requests: 0,
                average_response_time_ms: 0.0,
                last_used_at: None,
                circuit_breaker,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Returns `true` unless the breaker is open.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.ledger.lock().circuit_breaker.is_available()
    }

    #[must_use]
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.ledger.lock().circuit_breaker.state()
    }

    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.ledger.lock().active_connections
    }

    /// Selection weight: `(1 - failure_rate) * max(0, (1000 - avg_ms) / 1000)`.
    #[must_use]
    pub fn weight(&self) -> f64 {
        let ledger = self.ledger.lock();
        let latency_factor = ((1000.0 - ledger.average_response_time_ms) / 1000.0).max(0.0);
        (1.0 - ledger.failure_rate()) * latency_factor
    }

    /// Records a successful request and folds its latency into the running mean.
    pub fn record_success(&self, latency: Duration) {
        let mut ledger = self.ledger.lock();
        ledger.total_requests += 1;
        ledger.successful_requests += 1;
        ledger.last_used_at = Some(Utc::now());

        let latency_ms = latency.as_secs_f64() * 1000.0;
        #[allow(clippy::cast_precision_loss)]
        let n = ledger.successful_requests as f64;
        ledger.average_response_time_ms += (latency_ms - ledger.average_response_time_ms) / n;

        if ledger.circuit_breaker.on_success() {
            tracing::info!(endpoint = %self.config.name, "circuit breaker closed after successful request");
            metrics::counter!(
                "conduit_circuit_breaker_transitions_total",
                "endpoint" => self.config.name.to_string(),
                "to" => "closed"
            )
            .increment(1);
        }
    }

    /// Records a failed request. Returns `true` if the breaker opened.
    pub fn record_failure(&self) -> bool {
        let mut ledger = self.ledger.lock();
        ledger.total_requests += 1;
        ledger.failed_requests += 1;
        ledger.last_used_at = Some(Utc::now());

        let failure_rate = ledger.failure_rate();
        let opened = ledger.circuit_breaker.on_failure(failure_rate);
        if opened {
            metrics::counter!(
                "conduit_circuit_breaker_transitions_total",
                "endpoint" => self.config.name.to_string(),
                "to" => "open"
            )
            .increment(1);
        }
        opened
    }

    /// Records a successful health probe. Closes a half-open breaker without touching
    /// request counters.
    pub fn record_probe_success(&self) -> bool {
        let closed = self.ledger.lock().circuit_breaker.on_success();
        if closed {
            tracing::info!(endpoint = %self.config.name, "circuit breaker closed after health check");
        }
        closed
    }

    pub(crate) fn connection_opened(&self) {
        self.ledger.lock().active_connections += 1;
    }

    pub(crate) fn connections_released(&self, count: usize) {
        let mut ledger = self.ledger.lock();
        ledger.active_connections = ledger.active_connections.saturating_sub(count);
    }

    #[must_use]
    pub fn stats(&self) -> EndpointStats {
        let mut ledger = self.ledger.lock();
        let circuit_state = ledger.circuit_breaker.state();
        EndpointStats {
            name: self.config.name.to_string(),
            url: self.config.url.clone(),
            active_connections: ledger.active_connections,
            total_requests: ledger.total_requests,
            failed_requests: ledger.failed_requests,
            average_response_time_ms: ledger.average_response_time_ms,
            failure_rate: ledger.failure_rate(),
            circuit_state,
            last_used_at: ledger.last_used_at,
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("name", &self.config.name).finish_non_exhaustive()
    }
}
