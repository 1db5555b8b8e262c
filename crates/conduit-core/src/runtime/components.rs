//! Core component container for the Conduit runtime.

use crate::{
    metrics::MetricsCollector,
    scheduler::BatchScheduler,
    upstream::{ConnectionPool, HealthChecker, LoadBalancer, RequestExecutor},
};
use std::sync::Arc;

/// Container for all initialized core components.
///
/// Components are shared behind `Arc` and use interior mutability, so the container
/// is cheap to clone and hand to other tasks.
#[derive(Clone)]
pub struct ConduitComponents {
    balancer: Arc<LoadBalancer>,
    pool: Arc<ConnectionPool>,
    executor: Arc<RequestExecutor>,
    scheduler: Arc<BatchScheduler>,
    health_checker: Option<Arc<HealthChecker>>,
    metrics_collector: Arc<MetricsCollector>,
}

impl ConduitComponents {
    /// Called by `ConduitBuilder` during initialization.
    #[must_use]
    pub fn new(
        executor: Arc<RequestExecutor>,
        scheduler: Arc<BatchScheduler>,
        health_checker: Option<Arc<HealthChecker>>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            balancer: Arc::clone(executor.balancer()),
            pool: Arc::clone(executor.pool()),
            executor,
            scheduler,
            health_checker,
            metrics_collector,
        }
    }

    #[must_use]
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    /// `None` if health checking was disabled during initialization.
    #[must_use]
    pub fn health_checker(&self) -> Option<&Arc<HealthChecker>> {
        self.health_checker.as_ref()
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics_collector
    }

    #[must_use]
    pub fn has_health_checker(&self) -> bool {
        self.health_checker.is_some()
    }
}
