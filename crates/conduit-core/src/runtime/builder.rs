//! Builder for initializing a [`Conduit`] with configurable components.

use crate::{
    config::AppConfig,
    metrics::MetricsCollector,
    scheduler::{BatchObserver, BatchScheduler, CallHandler, FeeEstimator, OperationHandler},
    upstream::{
        ConnectionPool, Endpoint, ExecutorConfig, HealthChecker, HttpTransport,
        HttpTransportConfig, LoadBalancer, RequestExecutor, Transport,
    },
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

use super::{lifecycle::Conduit, ConduitComponents};

/// Errors that can occur while building a [`Conduit`].
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("No endpoints configured")]
    NoEndpoints,
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_checker: bool,
    enable_prometheus: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_health_checker: true, enable_prometheus: false, shutdown_channel_capacity: 16 }
    }
}

/// Builder for constructing a [`Conduit`].
///
/// Only the configuration is required. The transport defaults to [`HttpTransport`],
/// the handler to [`CallHandler`].
///
/// ```no_run
/// # use conduit_core::{config::AppConfig, runtime::ConduitBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let conduit = ConduitBuilder::new()
///     .with_config(AppConfig::load()?)
///     .enable_prometheus()
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ConduitBuilder {
    config: Option<AppConfig>,
    transport: Option<Arc<dyn Transport>>,
    handler: Option<Arc<dyn OperationHandler>>,
    fee_estimator: Option<Arc<dyn FeeEstimator>>,
    observer: Option<Arc<dyn BatchObserver>>,
    options: RuntimeOptions,
}

impl ConduitBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            handler: None,
            fee_estimator: None,
            observer: None,
            options: RuntimeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_fee_estimator(mut self, fee_estimator: Arc<dyn FeeEstimator>) -> Self {
        self.fee_estimator = Some(fee_estimator);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Overrides `health_check.enabled`.
    #[must_use]
    pub fn disable_health_checker(mut self) -> Self {
        self.options.enable_health_checker = false;
        self
    }

    /// Installs the process-wide Prometheus recorder (once per process).
    #[must_use]
    pub fn enable_prometheus(mut self) -> Self {
        self.options.enable_prometheus = true;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds every component. Nothing is spawned until [`Conduit::start`].
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] if the configuration is missing or invalid.
    pub fn build(self) -> Result<Conduit, BuilderError> {
        let config = self
            .config
            .ok_or_else(|| BuilderError::ConfigValidation("No configuration provided".to_string()))?;

        if config.endpoints.is_empty() {
            return Err(BuilderError::NoEndpoints);
        }
        config.validate().map_err(BuilderError::ConfigValidation)?;

        let enable_health_checker =
            self.options.enable_health_checker && config.health_check.enabled;
        info!(
            endpoints_count = config.endpoints.len(),
            strategy = ?config.load_balancer.strategy,
            health_checker_enabled = enable_health_checker,
            "Initializing Conduit runtime"
        );

        let endpoints: Vec<Arc<Endpoint>> =
            config.endpoint_configs().into_iter().map(|c| Arc::new(Endpoint::new(c))).collect();

        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(HttpTransport::new(HttpTransportConfig {
                connect_timeout: config.connection_timeout(),
                ..HttpTransportConfig::default()
            }))
        });

        let pool = Arc::new(ConnectionPool::new(transport, config.connection_timeout(), &endpoints));
        let balancer = Arc::new(LoadBalancer::new(endpoints, config.load_balancer.strategy));
        debug!("Connection pool and load balancer initialized");

        let executor = Arc::new(RequestExecutor::new(
            Arc::clone(&balancer),
            Arc::clone(&pool),
            ExecutorConfig {
                request_timeout: config.request_timeout(),
                max_retries: config.retry.max_retries,
                backoff: config.backoff_policy(),
            },
        ));

        let handler = self.handler.unwrap_or_else(|| Arc::new(CallHandler));
        let mut scheduler = BatchScheduler::new(
            config.scheduler.clone(),
            config.backoff_policy(),
            handler,
            Arc::clone(&executor),
        );
        if let Some(fee_estimator) = self.fee_estimator {
            scheduler = scheduler.with_fee_estimator(fee_estimator);
        }
        if let Some(observer) = self.observer {
            scheduler = scheduler.with_observer(observer);
        }
        debug!(max_batch_size = config.scheduler.max_batch_size, "Batch scheduler initialized");

        let health_checker = enable_health_checker.then(|| {
            Arc::new(HealthChecker::new(
                balancer,
                pool,
                config.health_check.method.clone(),
                Duration::from_millis(config.health_check.timeout_ms),
                config.health_check_interval(),
            ))
        });

        let metrics_collector = Arc::new(if self.options.enable_prometheus {
            MetricsCollector::with_prometheus(
                config.metrics.failure_rate_warning,
                config.scheduler.queue_depth_warning,
            )
        } else {
            MetricsCollector::new(
                config.metrics.failure_rate_warning,
                config.scheduler.queue_depth_warning,
            )
        });

        let components = ConduitComponents::new(
            executor,
            Arc::new(scheduler),
            health_checker,
            metrics_collector,
        );

        Ok(Conduit::new(components, config, self.options.shutdown_channel_capacity))
    }
}

impl Default for ConduitBuilder {
    fn default() -> Self {
        Self::new()
    }
}
