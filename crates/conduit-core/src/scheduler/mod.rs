//! Batched execution of typed operations.
//!
//! Operations are queued by priority, pulled into batches by a background loop, and
//! executed through an [`OperationHandler`]. A batch is ordered before it runs:
//!
//! ```text
//! OperationQueue ──pop──► group by type ──► resolve dependencies ──► windows
//!  (priority, FIFO)        (affinity order)   (cycles dropped)        (join_all)
//!        ▲                                                               │
//!        └────────────── retryable failure, after backoff ───────────────┘
//! ```
//!
//! Results are tracked per [`OperationId`] and can be polled with
//! [`BatchScheduler::get_result`] or awaited with [`BatchScheduler::wait_for_result`].

pub mod batch;
pub mod handler;
pub mod operation;
pub mod queue;
pub mod resolver;

pub use batch::{BatchObserver, BatchReport, BatchScheduler, SchedulerMetrics};
pub use handler::{CallHandler, ExecutionContext, FeeEstimator, FeeQuote, OperationHandler};
pub use operation::{
    is_retryable_message, ApproveParams, CallParams, HandlerOutput, Operation, OperationError,
    OperationId, OperationKind, OperationOutcome, OperationPayload, OperationStatus,
    RevokeParams, StakeParams, SwapParams, TransferParams, VoteParams,
};
pub use queue::OperationQueue;
pub use resolver::{group_by_kind, resolve_batch, ResolvedBatch};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batch formation and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// How often the loop tries to form a batch, in milliseconds. Defaults to `100`.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// A batch is only formed once this many operations are queued. Defaults to `1`.
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Defaults to `50`.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Hard ceiling applied on top of `max_batch_size`. Defaults to `100`.
    #[serde(default = "default_max_operations_per_batch")]
    pub max_operations_per_batch: usize,

    /// Defaults to `3`.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Operations executed concurrently inside one batch. Defaults to `5`.
    #[serde(default = "default_concurrency_window")]
    pub concurrency_window: usize,

    #[serde(default = "default_true")]
    pub enable_type_grouping: bool,

    #[serde(default = "default_true")]
    pub enable_dependency_resolution: bool,

    /// Per-attempt budget for one operation, in milliseconds. Defaults to `60000`.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Re-queues allowed after a retryable failure. Defaults to `3`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Queue depth that raises an alert in the metrics snapshot. Defaults to `1000`.
    #[serde(default = "default_queue_depth_warning")]
    pub queue_depth_warning: usize,

    /// How long shutdown waits for in-flight batches, in milliseconds. Defaults to `10000`.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_min_batch_size() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_operations_per_batch() -> usize {
    100
}

fn default_max_concurrent_batches() -> usize {
    3
}

fn default_concurrency_window() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_operation_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_queue_depth_warning() -> usize {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_interval_ms: default_batch_interval_ms(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            max_operations_per_batch: default_max_operations_per_batch(),
            max_concurrent_batches: default_max_concurrent_batches(),
            concurrency_window: default_concurrency_window(),
            enable_type_grouping: true,
            enable_dependency_resolution: true,
            operation_timeout_ms: default_operation_timeout_ms(),
            max_retries: default_max_retries(),
            queue_depth_warning: default_queue_depth_warning(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SchedulerSettings {
    #[must_use]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Largest batch the loop will form.
    #[must_use]
    pub fn batch_limit(&self) -> usize {
        self.max_batch_size.min(self.max_operations_per_batch)
    }

    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_interval_ms == 0 {
            return Err("scheduler.batch_interval_ms must be greater than 0".to_string());
        }
        if self.min_batch_size == 0 {
            return Err("scheduler.min_batch_size must be at least 1".to_string());
        }
        if self.min_batch_size > self.batch_limit() {
            return Err(format!(
                "scheduler.min_batch_size ({}) exceeds the batch limit ({})",
                self.min_batch_size,
                self.batch_limit()
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err("scheduler.max_concurrent_batches must be at least 1".to_string());
        }
        if self.concurrency_window == 0 {
            return Err("scheduler.concurrency_window must be at least 1".to_string());
        }
        if self.operation_timeout_ms == 0 {
            return Err("scheduler.operation_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
