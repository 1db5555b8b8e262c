use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use crate::upstream::UpstreamError;

/// Unique operation identifier, assigned when the [`Operation`] is built so that
/// callers can reference it in other operations' dependencies before submitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Operation type tag.
///
/// Declaration order is the type-affinity order used when grouping a batch:
/// authorization, value moving, governance, generic calls, cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Approve,
    Transfer,
    Swap,
    Stake,
    Vote,
    Call,
    Revoke,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Transfer => "transfer",
            Self::Swap => "swap",
            Self::Stake => "stake",
            Self::Vote => "vote",
            Self::Call => "call",
            Self::Revoke => "revoke",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproveParams {
    pub token: String,
    pub spender: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferParams {
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapParams {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: String,
    pub min_amount_out: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeParams {
    pub validator: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteParams {
    pub proposal_id: String,
    pub support: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokeParams {
    pub token: String,
    pub spender: String,
}

/// Typed operation body, tagged by operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    Approve(ApproveParams),
    Transfer(TransferParams),
    Swap(SwapParams),
    Stake(StakeParams),
    Vote(VoteParams),
    Call(CallParams),
    Revoke(RevokeParams),
}

impl OperationPayload {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Approve(_) => OperationKind::Approve,
            Self::Transfer(_) => OperationKind::Transfer,
            Self::Swap(_) => OperationKind::Swap,
            Self::Stake(_) => OperationKind::Stake,
            Self::Vote(_) => OperationKind::Vote,
            Self::Call(_) => OperationKind::Call,
            Self::Revoke(_) => OperationKind::Revoke,
        }
    }

    /// Shorthand for a generic remote call.
    #[must_use]
    pub fn call(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self::Call(CallParams { method: method.into(), params })
    }
}

/// A unit of work submitted to the scheduler.
///
/// # Example
///
/// ```
/// use conduit_core::scheduler::{Operation, OperationPayload};
///
/// let approve = Operation::new(OperationPayload::call("eth_chainId", None)).with_priority(5);
/// let follow_up = Operation::new(OperationPayload::call("eth_blockNumber", None))
///     .depends_on(approve.id);
/// assert_eq!(follow_up.dependencies, vec![approve.id]);
/// ```
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub payload: OperationPayload,
    /// Higher runs first; equal priorities keep submission order.
    pub priority: i32,
    /// Operations that must run earlier in the same batch. Ids outside the batch are
    /// treated as satisfied.
    pub dependencies: Vec<OperationId>,
    /// Overrides the scheduler's per-operation timeout.
    pub timeout: Option<Duration>,
    /// Overrides the scheduler's retry cap.
    pub max_retries: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Execution attempts so far.
    pub attempts: u32,
}

impl Operation {
    #[must_use]
    pub fn new(payload: OperationPayload) -> Self {
        Self {
            id: OperationId::new(),
            payload,
            priority: 0,
            dependencies: Vec::new(),
            timeout: None,
            max_retries: None,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: OperationId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// What a handler reports back for a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerOutput {
    pub result: serde_json::Value,
    /// Fee actually spent, in the remote system's smallest unit.
    pub fee_spent: u128,
    /// Identifier assigned by the remote system (e.g. a transaction hash).
    pub external_id: Option<String>,
}

impl HandlerOutput {
    #[must_use]
    pub fn new(result: serde_json::Value) -> Self {
        Self { result, fee_spent: 0, external_id: None }
    }

    #[must_use]
    pub fn with_fee(mut self, fee_spent: u128) -> Self {
        self.fee_spent = fee_spent;
        self
    }

    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// Result record of a completed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub output: HandlerOutput,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

/// Lifecycle state of a submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Queued,
    InBatch,
    Executing { attempt: u32 },
    /// Waiting out the backoff delay before going back into the queue.
    RetryQueued { attempt: u32, delay: Duration },
    Completed(OperationOutcome),
    Failed { error: OperationError, attempts: u32 },
}

impl OperationStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InBatch => "in_batch",
            Self::Executing { .. } => "executing",
            Self::RetryQueued { .. } => "retry_queued",
            Self::Completed(_) => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "underpriced",
    "price too low",
    "fee too low",
    "nonce",
    "sequence",
    "already known",
    "replacement",
    "rate limit",
    "too many requests",
    "503",
    "502",
    "504",
];

/// Returns `true` if an error message describes a condition that usually clears on retry.
#[must_use]
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Errors on the scheduled (batched) path.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum OperationError {
    /// The operation was part of a dependency cycle and was dropped from its batch.
    #[error("Dependency cycle detected; operation dropped")]
    DependencyCycle,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A remote call made by the handler failed.
    #[error("Upstream error ({kind}): {message}")]
    Upstream { kind: &'static str, message: String, retryable: bool },

    /// The handler has no implementation for this operation type.
    #[error("Unsupported operation type: {0}")]
    Unsupported(OperationKind),

    /// Domain-level failure reported by the handler.
    #[error("Handler error: {message}")]
    Handler { message: String, retryable: bool },

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// The batch task itself failed; none of its results can be trusted.
    #[error("Batch execution failed: {0}")]
    BatchFailed(String),

    #[error("Invalid operation: {0}")]
    Invalid(String),

    #[error("Shutting down")]
    ShuttingDown,
}

impl OperationError {
    /// Builds a handler error, classifying retryability from the message.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = is_retryable_message(&message);
        Self::Handler { message, retryable }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Upstream { retryable, .. } | Self::Handler { retryable, .. } => *retryable,
            _ => false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DependencyCycle => "dependency_cycle",
            Self::Timeout(_) => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Unsupported(_) => "unsupported",
            Self::Handler { .. } => "handler",
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            Self::BatchFailed(_) => "batch_failed",
            Self::Invalid(_) => "invalid",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl From<UpstreamError> for OperationError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::ShuttingDown => Self::ShuttingDown,
            other => Self::Upstream {
                kind: other.kind(),
                retryable: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
