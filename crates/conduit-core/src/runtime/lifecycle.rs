//! Runtime lifecycle: background tasks, the caller-facing operations, and shutdown.

use crate::{
    config::AppConfig,
    metrics::MetricsSnapshot,
    scheduler::{Operation, OperationError, OperationId, OperationOutcome, OperationStatus},
    upstream::{RequestOptions, UpstreamError},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{builder::ConduitBuilder, ConduitComponents};

/// The assembled execution core.
///
/// Callers either submit [`Operation`]s to the batch scheduler or issue direct
/// requests through the executor. Background work (the batch loop and the health
/// checker) runs between [`Conduit::start`] and [`Conduit::shutdown`].
pub struct Conduit {
    components: ConduitComponents,
    config: AppConfig,
    shutdown_tx: broadcast::Sender<()>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown_initiated: AtomicBool,
}

impl Conduit {
    #[must_use]
    pub fn builder() -> ConduitBuilder {
        ConduitBuilder::new()
    }

    pub(super) fn new(
        components: ConduitComponents,
        config: AppConfig,
        shutdown_channel_capacity: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(shutdown_channel_capacity.max(1));
        Self {
            components,
            config,
            shutdown_tx,
            health_task: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn components(&self) -> &ConduitComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Creates a receiver that fires once shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Starts the batch loop and, if enabled, the health checker. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.shutdown_initiated.load(Ordering::Acquire)
            || self.started.swap(true, Ordering::AcqRel)
        {
            return;
        }

        self.components.scheduler().start();

        if let Some(health_checker) = self.components.health_checker() {
            let handle = health_checker.clone().start_with_shutdown(self.shutdown_tx.subscribe());
            *self.health_task.lock() = Some(handle);
            debug!("Health checker task started");
        }

        info!("Conduit runtime started");
    }

    /// Queues an operation for batched execution.
    ///
    /// # Errors
    ///
    /// [`OperationError::ShuttingDown`] after shutdown, [`OperationError::Invalid`] for a
    /// duplicate id.
    pub fn submit(&self, operation: Operation) -> Result<OperationId, OperationError> {
        self.components.scheduler().submit(operation)
    }

    /// Queues several operations and forms a batch right away.
    ///
    /// # Errors
    ///
    /// Rejects the whole set if any operation would be rejected by [`Conduit::submit`].
    pub fn submit_batch(
        &self,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationId>, OperationError> {
        self.components.scheduler().submit_batch(operations)
    }

    /// Cancels a queued operation. Returns `false` once it left the queue.
    pub fn cancel(&self, id: &OperationId) -> bool {
        self.components.scheduler().cancel(id)
    }

    #[must_use]
    pub fn get_result(&self, id: &OperationId) -> Option<OperationStatus> {
        self.components.scheduler().get_result(id)
    }

    /// Waits for an operation to complete or fail. `None` for unknown ids.
    pub async fn wait_for_result(
        &self,
        id: &OperationId,
    ) -> Option<Result<OperationOutcome, OperationError>> {
        self.components.scheduler().wait_for_result(id).await
    }

    /// Removes a finished operation's record and returns its final status.
    pub fn take_result(&self, id: &OperationId) -> Option<OperationStatus> {
        self.components.scheduler().take_result(id)
    }

    /// Issues one call on the direct (unbatched) path.
    ///
    /// # Errors
    ///
    /// See [`crate::upstream::RequestExecutor::execute`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.request_with(method, params, RequestOptions::default()).await
    }

    /// Like [`Conduit::request`] with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`crate::upstream::RequestExecutor::execute`].
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.components.executor().execute(method, params, options).await
    }

    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.components
            .metrics_collector()
            .snapshot(self.components.executor(), self.components.scheduler())
    }

    /// Graceful shutdown. Idempotent.
    ///
    /// Stops accepting work, lets in-flight batches finish within
    /// `scheduler.shutdown_grace_ms`, fails everything still queued, rejects pending
    /// direct requests with [`UpstreamError::ShuttingDown`], and releases connections.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating Conduit runtime shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("No background task subscribed to the shutdown signal");
        }

        let scheduler = self.components.scheduler();
        scheduler.shutdown(scheduler.settings().shutdown_grace()).await;
        self.components.executor().shutdown().await;

        let health_task = self.health_task.lock().take();
        if let Some(task) = health_task {
            match task.await {
                Ok(()) => debug!("Health checker task completed"),
                Err(e) if e.is_cancelled() => debug!("Health checker task cancelled"),
                Err(e) => error!(error = %e, "Health checker task failed"),
            }
        }

        let metrics = self.get_metrics();
        if metrics.scheduler.operations_failed > 0 {
            warn!(
                operations_failed = metrics.scheduler.operations_failed,
                "Some operations failed during this run"
            );
        }
        info!(
            total_requests = metrics.requests.total,
            total_batches = metrics.scheduler.total_batches,
            "Conduit runtime shutdown complete"
        );
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<Conduit>;
    let _ = assert_sync::<Conduit>;
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scheduler::OperationPayload,
        upstream::{testing::ScriptedTransport, CircuitBreakerState},
    };
    use serde_json::json;
    use std::{sync::Arc, time::Duration};

    fn conduit(transport: &ScriptedTransport) -> Conduit {
        let mut config = AppConfig::default();
        config.scheduler.batch_interval_ms = 10;
        ConduitBuilder::new()
            .with_config(config)
            .with_transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_request() {
        let transport = ScriptedTransport::new();
        let conduit = conduit(&transport);
        conduit.start();

        let id = conduit
            .submit(Operation::new(OperationPayload::call("eth_chainId", None)))
            .unwrap();
        let outcome = conduit.wait_for_result(&id).await.unwrap().unwrap();
        assert_eq!(outcome.output.result, json!("0x1"));

        let direct = conduit.request("eth_blockNumber", None).await.unwrap();
        assert_eq!(direct, json!("0x1"));

        let metrics = conduit.get_metrics();
        assert_eq!(metrics.requests.total, 2);
        assert_eq!(metrics.requests.successful, 2);
        assert_eq!(metrics.healthy_endpoints, 2);
        assert!(metrics
            .endpoints
            .iter()
            .all(|e| e.circuit_state == CircuitBreakerState::Closed));

        conduit.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_work() {
        let transport = ScriptedTransport::new();
        let conduit = conduit(&transport);
        conduit.start();

        let mut rx = conduit.shutdown_receiver();
        conduit.shutdown().await;
        conduit.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("shutdown signal")
            .expect("channel open");

        let submitted = conduit.submit(Operation::new(OperationPayload::call("x", None)));
        assert!(matches!(submitted, Err(OperationError::ShuttingDown)));
        assert!(matches!(conduit.request("x", None).await, Err(UpstreamError::ShuttingDown)));
        assert_eq!(conduit.components().pool().connection_count("primary").await, 0);
    }

    #[tokio::test]
    async fn test_start_after_shutdown_does_nothing() {
        let conduit = conduit(&ScriptedTransport::new());
        conduit.shutdown().await;
        conduit.start();
        assert!(conduit.health_task.lock().is_none());
    }
}
