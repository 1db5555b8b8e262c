//! # Metrics
//!
//! Two views of the same system:
//!
//! ## Event stream
//!
//! Every request, retry, breaker transition, and batch is recorded through the
//! `metrics` facade at the call site (`counter!`, `gauge!`, `histogram!`). When a
//! Prometheus recorder is installed the events are rendered in text exposition format
//! by [`MetricsCollector::render_prometheus`].
//!
//! ## Snapshot
//!
//! [`MetricsCollector::snapshot`] reads the endpoint ledgers, the executor's request
//! totals, and the scheduler's batch statistics into a serializable
//! [`MetricsSnapshot`]. Building a snapshot only takes short per-endpoint locks and
//! never fails.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::OnceLock;
use tokio::time::Instant;

use crate::{
    scheduler::{BatchScheduler, SchedulerMetrics},
    upstream::{CircuitBreakerState, EndpointStats, RequestExecutor, RequestTotals},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // Another recorder owns the global slot; keep a local one so rendering works.
                tracing::warn!(error = %e, "failed to install global Prometheus recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Gauge encoding of a breaker state: closed 0, half-open 0.5, open 1.
#[must_use]
pub fn circuit_state_gauge(state: CircuitBreakerState) -> f64 {
    match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::HalfOpen => 0.5,
        CircuitBreakerState::Open => 1.0,
    }
}

/// A condition worth an operator's attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthAlert {
    CircuitOpen { endpoint: String },
    HighFailureRate { endpoint: String, failure_rate: f64, threshold: f64 },
    QueueBacklog { depth: usize, threshold: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputMetrics {
    pub uptime_seconds: f64,
    pub requests_per_second: f64,
    pub operations_per_second: f64,
}

/// Point-in-time view of the whole core.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub endpoints: Vec<EndpointStats>,
    pub healthy_endpoints: usize,
    pub requests: RequestTotals,
    /// Share of logical requests that succeeded; `1.0` before any request finished.
    pub request_success_rate: f64,
    pub pending_requests: usize,
    pub throughput: ThroughputMetrics,
    pub queue_depth: usize,
    pub in_flight_batches: usize,
    pub scheduler: SchedulerMetrics,
    pub alerts: Vec<HealthAlert>,
}

/// Builds snapshots and owns the optional Prometheus handle.
pub struct MetricsCollector {
    started_at: Instant,
    prometheus: Option<PrometheusHandle>,
    failure_rate_warning: f64,
    queue_depth_warning: usize,
}

impl MetricsCollector {
    /// Creates a collector without a Prometheus recorder.
    #[must_use]
    pub fn new(failure_rate_warning: f64, queue_depth_warning: usize) -> Self {
        Self { started_at: Instant::now(), prometheus: None, failure_rate_warning, queue_depth_warning }
    }

    /// Creates a collector and installs the process-wide Prometheus recorder once.
    #[must_use]
    pub fn with_prometheus(failure_rate_warning: f64, queue_depth_warning: usize) -> Self {
        Self {
            prometheus: Some(init_prometheus_recorder()),
            ..Self::new(failure_rate_warning, queue_depth_warning)
        }
    }

    /// Prometheus text exposition, or `None` when no recorder was installed.
    #[must_use]
    pub fn render_prometheus(&self) -> Option<String> {
        self.prometheus.as_ref().map(PrometheusHandle::render)
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn snapshot(&self, executor: &RequestExecutor, scheduler: &BatchScheduler) -> MetricsSnapshot {
        let endpoints: Vec<EndpointStats> =
            executor.balancer().endpoints().iter().map(|endpoint| endpoint.stats()).collect();

        for stats in &endpoints {
            metrics::gauge!("conduit_circuit_breaker_state", "endpoint" => stats.name.clone())
                .set(circuit_state_gauge(stats.circuit_state));
        }

        let requests = executor.totals();
        let finished = requests.successful + requests.failed;
        let request_success_rate =
            if finished == 0 { 1.0 } else { requests.successful as f64 / finished as f64 };

        let scheduler_metrics = scheduler.metrics();
        let queue_depth = scheduler.queue_depth();

        let uptime = self.started_at.elapsed().as_secs_f64();
        let per_second = |count: u64| if uptime > 0.0 { count as f64 / uptime } else { 0.0 };
        let throughput = ThroughputMetrics {
            uptime_seconds: uptime,
            requests_per_second: per_second(requests.total),
            operations_per_second: per_second(
                scheduler_metrics.operations_succeeded + scheduler_metrics.operations_failed,
            ),
        };

        let alerts = self.evaluate_alerts(&endpoints, queue_depth);
        let healthy_endpoints =
            endpoints.iter().filter(|s| s.circuit_state != CircuitBreakerState::Open).count();

        MetricsSnapshot {
            endpoints,
            healthy_endpoints,
            requests,
            request_success_rate,
            pending_requests: executor.pending_requests(),
            throughput,
            queue_depth,
            in_flight_batches: scheduler.in_flight_batches(),
            scheduler: scheduler_metrics,
            alerts,
        }
    }

    fn evaluate_alerts(&self, endpoints: &[EndpointStats], queue_depth: usize) -> Vec<HealthAlert> {
        let mut alerts = Vec::new();
        for stats in endpoints {
            if stats.circuit_state == CircuitBreakerState::Open {
                alerts.push(HealthAlert::CircuitOpen { endpoint: stats.name.clone() });
            }
            if stats.failure_rate > self.failure_rate_warning {
                alerts.push(HealthAlert::HighFailureRate {
                    endpoint: stats.name.clone(),
                    failure_rate: stats.failure_rate,
                    threshold: self.failure_rate_warning,
                });
            }
        }
        if queue_depth > self.queue_depth_warning {
            alerts.push(HealthAlert::QueueBacklog { depth: queue_depth, threshold: self.queue_depth_warning });
        }
        alerts
    }
}
