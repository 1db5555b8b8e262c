use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, watch, Notify},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    scheduler::{
        handler::{ExecutionContext, FeeEstimator, OperationHandler},
        operation::{
            HandlerOutput, Operation, OperationError, OperationId, OperationOutcome,
            OperationStatus,
        },
        queue::OperationQueue,
        resolver::{group_by_kind, resolve_batch},
        SchedulerSettings,
    },
    upstream::{BackoffPolicy, RequestExecutor},
};

/// Summary of one executed batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: u64,
    pub formed_at: DateTime<Utc>,
    pub size: usize,
    pub succeeded: usize,
    /// Terminal failures, including operations dropped for dependency cycles.
    pub failed: usize,
    pub retried: usize,
    pub dropped: usize,
    pub duration_ms: f64,
}

impl BatchReport {
    /// A batch is successful when none of its operations failed terminally.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Receives a report after every batch.
pub trait BatchObserver: Send + Sync {
    fn on_batch_completed(&self, report: &BatchReport);
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub total_batches: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    pub batch_success_rate: f64,
    pub average_batch_size: f64,
    pub average_execution_time_ms: f64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub operations_retried: u64,
    pub operations_dropped: u64,
    pub operations_submitted: u64,
    pub operations_cancelled: u64,
}

impl SchedulerMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn record_batch(&mut self, report: &BatchReport) {
        self.total_batches += 1;
        if report.is_success() {
            self.successful_batches += 1;
        } else {
            self.failed_batches += 1;
        }
        let n = self.total_batches as f64;
        self.batch_success_rate = self.successful_batches as f64 / n;
        self.average_batch_size += (report.size as f64 - self.average_batch_size) / n;
        self.average_execution_time_ms +=
            (report.duration_ms - self.average_execution_time_ms) / n;
        self.operations_succeeded += report.succeeded as u64;
        self.operations_failed += report.failed as u64;
        self.operations_retried += report.retried as u64;
        self.operations_dropped += report.dropped as u64;
    }
}

/// How one operation's attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Succeeded,
    Failed,
    Retried,
}

struct OperationRecord {
    status: watch::Sender<OperationStatus>,
}

/// Batches queued operations and runs them through the [`OperationHandler`].
///
/// A background loop forms batches on a fixed interval and eagerly after
/// [`BatchScheduler::submit_batch`]. Each batch runs as its own task; at most
/// `max_concurrent_batches` are in flight, and inside a batch at most
/// `concurrency_window` operations run at once.
pub struct BatchScheduler {
    settings: SchedulerSettings,
    backoff: BackoffPolicy,
    queue: OperationQueue,
    records: DashMap<OperationId, OperationRecord>,
    handler: Arc<dyn OperationHandler>,
    fee_estimator: Option<Arc<dyn FeeEstimator>>,
    observer: Option<Arc<dyn BatchObserver>>,
    executor: Arc<RequestExecutor>,
    metrics: Mutex<SchedulerMetrics>,
    in_flight: AtomicUsize,
    next_batch_id: AtomicU64,
    wake: Notify,
    batch_done: Notify,
    running: AtomicBool,
    shutting_down: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(
        settings: SchedulerSettings,
        backoff: BackoffPolicy,
        handler: Arc<dyn OperationHandler>,
        executor: Arc<RequestExecutor>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            settings,
            backoff,
            queue: OperationQueue::new(),
            records: DashMap::new(),
            handler,
            fee_estimator: None,
            observer: None,
            executor,
            metrics: Mutex::new(SchedulerMetrics::default()),
            in_flight: AtomicUsize::new(0),
            next_batch_id: AtomicU64::new(1),
            wake: Notify::new(),
            batch_done: Notify::new(),
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
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

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn in_flight_batches(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.lock().clone()
    }

    /// Queues one operation. Never blocks.
    ///
    /// # Errors
    ///
    /// - [`OperationError::ShuttingDown`] after shutdown began
    /// - [`OperationError::Invalid`] if an operation with the same id is known
    pub fn submit(&self, operation: Operation) -> Result<OperationId, OperationError> {
        self.ensure_accepting()?;
        if self.records.contains_key(&operation.id) {
            return Err(OperationError::Invalid(format!("duplicate operation id {}", operation.id)));
        }
        Ok(self.enqueue_new(operation))
    }

    /// Queues several operations and triggers batch formation immediately.
    ///
    /// # Errors
    ///
    /// Rejects the whole set, queuing nothing, if shutdown began or any id is a
    /// duplicate.
    pub fn submit_batch(
        &self,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationId>, OperationError> {
        self.ensure_accepting()?;

        let mut seen = HashSet::with_capacity(operations.len());
        for operation in &operations {
            if !seen.insert(operation.id) || self.records.contains_key(&operation.id) {
                return Err(OperationError::Invalid(format!(
                    "duplicate operation id {}",
                    operation.id
                )));
            }
        }

        let ids = operations.into_iter().map(|op| self.enqueue_new(op)).collect();
        self.wake.notify_one();
        Ok(ids)
    }

    fn ensure_accepting(&self) -> Result<(), OperationError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(OperationError::ShuttingDown);
        }
        Ok(())
    }

    fn enqueue_new(&self, operation: Operation) -> OperationId {
        let id = operation.id;
        let (status, _) = watch::channel(OperationStatus::Queued);
        self.records.insert(id, OperationRecord { status });
        self.queue.push(operation);
        self.metrics.lock().operations_submitted += 1;
        metrics::gauge!("conduit_scheduler_queue_depth").set(self.queue.len() as f64);
        id
    }

    /// Removes a still-queued operation. Returns `false` once it has left the queue.
    pub fn cancel(&self, id: &OperationId) -> bool {
        if self.queue.remove(id).is_none() {
            return false;
        }
        self.records.remove(id);
        self.metrics.lock().operations_cancelled += 1;
        debug!(operation_id = %id, "operation cancelled");
        true
    }

    /// Current status, or `None` for unknown, cancelled, or taken operations.
    #[must_use]
    pub fn get_result(&self, id: &OperationId) -> Option<OperationStatus> {
        self.records.get(id).map(|record| record.status.borrow().clone())
    }

    /// Removes and returns a finished operation's status. Unfinished records stay.
    pub fn take_result(&self, id: &OperationId) -> Option<OperationStatus> {
        self.records
            .remove_if(id, |_, record| record.status.borrow().is_terminal())
            .map(|(_, record)| record.status.borrow().clone())
    }

    /// Waits until the operation completes or fails.
    ///
    /// Returns `None` if the operation is unknown or was cancelled while waiting.
    pub async fn wait_for_result(
        &self,
        id: &OperationId,
    ) -> Option<Result<OperationOutcome, OperationError>> {
        let mut rx = self.records.get(id)?.status.subscribe();
        let status = rx.wait_for(OperationStatus::is_terminal).await.ok()?.clone();
        match status {
            OperationStatus::Completed(outcome) => Some(Ok(outcome)),
            OperationStatus::Failed { error, .. } => Some(Err(error)),
            _ => None,
        }
    }

    fn set_status(&self, id: &OperationId, status: OperationStatus) {
        if let Some(record) = self.records.get(id) {
            record.status.send_replace(status);
        }
    }

    /// Spawns the batch formation loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) || self.shutting_down.load(Ordering::Acquire)
        {
            return;
        }

        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.settings.batch_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => scheduler.dispatch_batches(),
                    () = scheduler.wake.notified() => scheduler.dispatch_batches(),
                }
            }
            debug!("batch formation loop stopped");
        });

        *self.loop_handle.lock() = Some(handle);
        info!(
            interval_ms = self.settings.batch_interval_ms,
            max_batch_size = self.settings.max_batch_size,
            "batch scheduler started"
        );
    }

    /// Forms and spawns batches while the queue and the in-flight cap allow.
    pub fn dispatch_batches(self: &Arc<Self>) {
        while !self.shutting_down.load(Ordering::Acquire) {
            let max_batches = self.settings.max_concurrent_batches;
            let reserved = self
                .in_flight
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < max_batches).then_some(n + 1)
                })
                .is_ok();
            if !reserved {
                return;
            }

            let batch = self
                .queue
                .pop_batch_if_at_least(self.settings.min_batch_size, self.settings.batch_limit());
            if batch.is_empty() {
                self.release_batch_slot();
                return;
            }

            metrics::gauge!("conduit_scheduler_queue_depth").set(self.queue.len() as f64);
            self.spawn_batch(batch);
        }
    }

    fn release_batch_slot(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.batch_done.notify_one();
    }

    fn spawn_batch(self: &Arc<Self>, batch: Vec<Operation>) {
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let ids: Vec<OperationId> = batch.iter().map(|op| op.id).collect();
        for id in &ids {
            self.set_status(id, OperationStatus::InBatch);
        }

        let scheduler = Arc::clone(self);
        let task = tokio::spawn(Arc::clone(self).run_batch(batch_id, batch));

        tokio::spawn(async move {
            if let Err(join_error) = task.await {
                error!(batch_id, error = %join_error, "batch task failed");
                scheduler.fail_unfinished(&ids, &join_error.to_string());
            }
            scheduler.release_batch_slot();
        });
    }

    /// Marks every operation of a crashed batch that hasn't reached a terminal state.
    fn fail_unfinished(&self, ids: &[OperationId], reason: &str) {
        let mut failed = 0usize;
        for id in ids {
            let Some(record) = self.records.get(id) else { continue };
            let current = record.status.borrow().clone();
            let attempts = match current {
                OperationStatus::InBatch => 0,
                OperationStatus::Executing { attempt } => attempt,
                _ => continue,
            };
            record.status.send_replace(OperationStatus::Failed {
                error: OperationError::BatchFailed(reason.to_string()),
                attempts,
            });
            failed += 1;
        }

        let mut metrics = self.metrics.lock();
        metrics.total_batches += 1;
        metrics.failed_batches += 1;
        metrics.operations_failed += failed as u64;
        #[allow(clippy::cast_precision_loss)]
        {
            metrics.batch_success_rate =
                metrics.successful_batches as f64 / metrics.total_batches as f64;
        }
    }

    async fn run_batch(self: Arc<Self>, batch_id: u64, batch: Vec<Operation>) {
        let formed_at = Utc::now();
        let started = Instant::now();
        let size = batch.len();

        let batch = if self.settings.enable_type_grouping { group_by_kind(batch) } else { batch };
        let (ordered, dropped) = if self.settings.enable_dependency_resolution {
            let resolved = resolve_batch(batch);
            (resolved.ordered, resolved.dropped)
        } else {
            (batch, Vec::new())
        };

        if !dropped.is_empty() {
            let ids: Vec<String> = dropped.iter().map(|op| op.id.to_string()).collect();
            warn!(batch_id, dropped = ?ids, "dropping operations in a dependency cycle");
            for op in &dropped {
                self.set_status(&op.id, OperationStatus::Failed {
                    error: OperationError::DependencyCycle,
                    attempts: op.attempts,
                });
            }
        }

        debug!(batch_id, size, runnable = ordered.len(), "executing batch");

        let mut report = BatchReport {
            batch_id,
            formed_at,
            size,
            succeeded: 0,
            failed: dropped.len(),
            retried: 0,
            dropped: dropped.len(),
            duration_ms: 0.0,
        };

        let window = self.settings.concurrency_window.max(1);
        let mut remaining = ordered.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<Operation> = remaining.by_ref().take(window).collect();
            let outcomes = join_all(chunk.into_iter().map(|op| self.execute_operation(op))).await;
            for outcome in outcomes {
                match outcome {
                    AttemptOutcome::Succeeded => report.succeeded += 1,
                    AttemptOutcome::Failed => report.failed += 1,
                    AttemptOutcome::Retried => report.retried += 1,
                }
            }
        }

        report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.lock().record_batch(&report);

        metrics::counter!(
            "conduit_scheduler_batches_total",
            "status" => if report.is_success() { "success" } else { "failure" }
        )
        .increment(1);
        metrics::histogram!("conduit_scheduler_batch_size").record(size as f64);
        metrics::histogram!("conduit_scheduler_batch_duration_seconds")
            .record(report.duration_ms / 1000.0);

        debug!(
            batch_id,
            succeeded = report.succeeded,
            failed = report.failed,
            retried = report.retried,
            duration_ms = report.duration_ms,
            "batch complete"
        );

        if let Some(observer) = &self.observer {
            observer.on_batch_completed(&report);
        }
    }

    async fn execute_operation(self: &Arc<Self>, mut op: Operation) -> AttemptOutcome {
        op.attempts += 1;
        let attempt = op.attempts;
        self.set_status(&op.id, OperationStatus::Executing { attempt });

        let timeout = op.timeout.unwrap_or_else(|| self.settings.operation_timeout());
        let result = match tokio::time::timeout(timeout, self.run_handler(&op)).await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Timeout(timeout)),
        };

        match result {
            Ok(output) => {
                metrics::counter!(
                    "conduit_operations_total",
                    "type" => op.kind().as_str(),
                    "status" => "success"
                )
                .increment(1);
                self.set_status(&op.id, OperationStatus::Completed(OperationOutcome {
                    output,
                    attempts: attempt,
                    completed_at: Utc::now(),
                }));
                AttemptOutcome::Succeeded
            }
            Err(error) => {
                let max_retries = op.max_retries.unwrap_or(self.settings.max_retries);
                let shutting_down = self.shutting_down.load(Ordering::Acquire);

                if error.is_retryable() && attempt <= max_retries && !shutting_down {
                    let delay = self.backoff.delay_for(attempt);
                    debug!(
                        operation_id = %op.id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "operation failed, re-queuing"
                    );
                    self.schedule_retry(op, delay);
                    return AttemptOutcome::Retried;
                }

                let error = if error.is_retryable() && attempt > max_retries {
                    OperationError::MaxRetriesExceeded {
                        attempts: attempt,
                        last_error: error.to_string(),
                    }
                } else {
                    error
                };
                warn!(
                    operation_id = %op.id,
                    kind = %op.kind(),
                    attempt,
                    error = %error,
                    "operation failed"
                );
                metrics::counter!(
                    "conduit_operations_total",
                    "type" => op.kind().as_str(),
                    "status" => "failure"
                )
                .increment(1);
                self.set_status(&op.id, OperationStatus::Failed { error, attempts: attempt });
                AttemptOutcome::Failed
            }
        }
    }

    async fn run_handler(&self, op: &Operation) -> Result<HandlerOutput, OperationError> {
        let fee_quote = match &self.fee_estimator {
            Some(estimator) => Some(estimator.estimate(op).await?),
            None => None,
        };
        let ctx = ExecutionContext::new(op.id, op.attempts, fee_quote, Arc::clone(&self.executor));
        self.handler.execute(&ctx, &op.payload).await
    }

    fn schedule_retry(self: &Arc<Self>, op: Operation, delay: Duration) {
        self.set_status(&op.id, OperationStatus::RetryQueued { attempt: op.attempts, delay });
        metrics::counter!("conduit_operation_retries_total", "type" => op.kind().as_str())
            .increment(1);

        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {}
            }

            scheduler.requeue(op);
        });
    }

    /// Puts a retried operation back in the queue and wakes the batch loop, or fails it
    /// once shutdown has begun.
    fn requeue(&self, op: Operation) {
        let id = op.id;
        let attempts = op.attempts;
        let fail = || {
            self.set_status(&id, OperationStatus::Failed {
                error: OperationError::ShuttingDown,
                attempts,
            });
        };

        if self.shutting_down.load(Ordering::Acquire) {
            fail();
            return;
        }

        self.set_status(&id, OperationStatus::Queued);
        if !self.queue.push(op) {
            return;
        }

        // Shutdown may have drained the queue between the check and the push. If the
        // operation is still there, nobody else will fail it.
        if self.shutting_down.load(Ordering::Acquire) {
            if self.queue.remove(&id).is_some() {
                fail();
            }
            return;
        }

        self.wake.notify_one();
    }

    /// Stops batch formation, waits up to `grace` for in-flight batches, then fails
    /// everything still queued with [`OperationError::ShuttingDown`]. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let _ = self.shutdown_tx.send(());
        let loop_handle = self.loop_handle.lock().take();
        if let Some(handle) = loop_handle {
            let _ = handle.await;
        }

        let deadline = Instant::now() + grace;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            if tokio::time::timeout_at(deadline, self.batch_done.notified()).await.is_err() {
                warn!(
                    in_flight = self.in_flight.load(Ordering::Acquire),
                    "in-flight batches still running after shutdown grace period"
                );
                break;
            }
        }

        let abandoned = self.queue.drain();
        for op in &abandoned {
            self.set_status(&op.id, OperationStatus::Failed {
                error: OperationError::ShuttingDown,
                attempts: op.attempts,
            });
        }
        info!(abandoned = abandoned.len(), "batch scheduler shut down");
    }
}
