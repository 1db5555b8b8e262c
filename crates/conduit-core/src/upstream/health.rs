use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    types::JsonRpcRequest,
    upstream::{
        circuit_breaker::CircuitBreakerState, endpoint::Endpoint, errors::UpstreamError,
        load_balancer::LoadBalancer, pool::ConnectionPool,
    },
};

/// Outcome of probing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    /// Breaker state after the probe was applied.
    pub circuit_state: CircuitBreakerState,
}

/// Periodically probes endpoints whose breaker isn't closed.
///
/// A successful probe against a half-open endpoint closes its breaker. Probes don't
/// touch request counters, so they never move an endpoint's failure rate.
pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    pool: Arc<ConnectionPool>,
    method: String,
    probe_timeout: Duration,
    check_interval: Duration,
}

impl HealthChecker {
    #[must_use]
    pub fn new(
        balancer: Arc<LoadBalancer>,
        pool: Arc<ConnectionPool>,
        method: impl Into<String>,
        probe_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self { balancer, pool, method: method.into(), probe_timeout, check_interval }
    }

    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.check_interval);
            // The first tick completes immediately; nothing is tripped at startup.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.check_tripped_endpoints().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health checker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every endpoint whose breaker is open or half-open.
    pub async fn check_tripped_endpoints(&self) -> Vec<ProbeResult> {
        let endpoints = self.balancer.endpoints();
        let mut results = Vec::new();

        for endpoint in endpoints.iter() {
            if endpoint.circuit_state() == CircuitBreakerState::Closed {
                continue;
            }
            results.push(self.probe(endpoint).await);
        }

        if !results.is_empty() {
            debug!(probed = results.len(), "health check round complete");
        }
        results
    }

    /// Probes every endpoint regardless of breaker state.
    pub async fn probe_all(&self) -> Vec<ProbeResult> {
        let endpoints = self.balancer.endpoints();
        let mut results = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints.iter() {
            results.push(self.probe(endpoint).await);
        }
        results
    }

    async fn probe(&self, endpoint: &Arc<Endpoint>) -> ProbeResult {
        let started = Instant::now();
        let outcome = self.call_probe(endpoint).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = started.elapsed().as_millis() as u64;

        let name = endpoint.name().to_string();
        metrics::counter!(
            "conduit_health_checks_total",
            "endpoint" => name.clone(),
            "status" => if outcome.is_ok() { "success" } else { "failure" }
        )
        .increment(1);

        match outcome {
            Ok(()) => {
                if endpoint.record_probe_success() {
                    info!(endpoint = %name, latency_ms, "endpoint recovered");
                }
                ProbeResult {
                    endpoint: name,
                    healthy: true,
                    latency_ms: Some(latency_ms),
                    error: None,
                    circuit_state: endpoint.circuit_state(),
                }
            }
            Err(e) => {
                warn!(endpoint = %name, error = %e, "health check failed");
                ProbeResult {
                    endpoint: name,
                    healthy: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                    circuit_state: endpoint.circuit_state(),
                }
            }
        }
    }

    async fn call_probe(&self, endpoint: &Endpoint) -> Result<(), UpstreamError> {
        let lease = self.pool.acquire(endpoint.name()).await?;
        let request = JsonRpcRequest::new(self.method.clone(), None, serde_json::json!(0));
        tokio::time::timeout(self.probe_timeout, lease.call(&request))
            .await
            .map_err(|_| UpstreamError::RequestTimeout)??;
        Ok(())
    }
}
