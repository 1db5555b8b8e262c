use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    scheduler::operation::{
        ApproveParams, CallParams, HandlerOutput, Operation, OperationError, OperationId,
        OperationKind, OperationPayload, RevokeParams, StakeParams, SwapParams, TransferParams,
        VoteParams,
    },
    upstream::{RequestExecutor, RequestOptions},
};

/// Fee ceiling and execution limit for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Highest fee the operation may spend, in the remote system's smallest unit.
    pub max_fee: u128,
    /// Execution limit (e.g. gas) to submit with.
    pub limit: u64,
}

/// Prices operations before execution.
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    /// # Errors
    ///
    /// A retryable error re-queues the operation like any other retryable failure.
    async fn estimate(&self, operation: &Operation) -> Result<FeeQuote, OperationError>;
}

/// Everything a handler needs to run one attempt of one operation.
pub struct ExecutionContext {
    pub operation_id: OperationId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub fee_quote: Option<FeeQuote>,
    executor: Arc<RequestExecutor>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(
        operation_id: OperationId,
        attempt: u32,
        fee_quote: Option<FeeQuote>,
        executor: Arc<RequestExecutor>,
    ) -> Self {
        Self { operation_id, attempt, fee_quote, executor }
    }

    /// Issues a remote call through the resilient request path.
    ///
    /// # Errors
    ///
    /// Returns the executor's error converted to [`OperationError::Upstream`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, OperationError> {
        self.request_with(method, params, RequestOptions::default()).await
    }

    /// Like [`ExecutionContext::request`] with per-call options.
    ///
    /// # Errors
    ///
    /// Returns the executor's error converted to [`OperationError::Upstream`].
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<serde_json::Value, OperationError> {
        Ok(self.executor.execute(method, params, options).await?)
    }

    /// Bounds a handler-computed fee by the estimator's ceiling.
    #[must_use]
    pub fn clamp_fee(&self, fee: u128) -> u128 {
        match self.fee_quote {
            Some(quote) => fee.min(quote.max_fee),
            None => fee,
        }
    }
}

/// Domain logic for each operation type.
///
/// Every method but [`OperationHandler::call`] defaults to
/// [`OperationError::Unsupported`]; `call` forwards the method and params through the
/// request executor.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn approve(
        &self,
        _ctx: &ExecutionContext,
        _params: &ApproveParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Approve))
    }

    async fn transfer(
        &self,
        _ctx: &ExecutionContext,
        _params: &TransferParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Transfer))
    }

    async fn swap(
        &self,
        _ctx: &ExecutionContext,
        _params: &SwapParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Swap))
    }

    async fn stake(
        &self,
        _ctx: &ExecutionContext,
        _params: &StakeParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Stake))
    }

    async fn vote(
        &self,
        _ctx: &ExecutionContext,
        _params: &VoteParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Vote))
    }

    async fn call(
        &self,
        ctx: &ExecutionContext,
        params: &CallParams,
    ) -> Result<HandlerOutput, OperationError> {
        let result = ctx.request(&params.method, params.params.clone()).await?;
        Ok(HandlerOutput::new(result))
    }

    async fn revoke(
        &self,
        _ctx: &ExecutionContext,
        _params: &RevokeParams,
    ) -> Result<HandlerOutput, OperationError> {
        Err(OperationError::Unsupported(OperationKind::Revoke))
    }

    /// Dispatches `payload` to the method for its type.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        payload: &OperationPayload,
    ) -> Result<HandlerOutput, OperationError> {
        match payload {
            OperationPayload::Approve(p) => self.approve(ctx, p).await,
            OperationPayload::Transfer(p) => self.transfer(ctx, p).await,
            OperationPayload::Swap(p) => self.swap(ctx, p).await,
            OperationPayload::Stake(p) => self.stake(ctx, p).await,
            OperationPayload::Vote(p) => self.vote(ctx, p).await,
            OperationPayload::Call(p) => self.call(ctx, p).await,
            OperationPayload::Revoke(p) => self.revoke(ctx, p).await,
        }
    }
}

/// Handler that only supports generic calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallHandler;

impl OperationHandler for CallHandler {}
