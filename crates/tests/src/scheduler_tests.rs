//! Batched operations end to end through a custom handler.

use crate::mock_infrastructure::{conduit_config, RpcMockBuilder};
use async_trait::async_trait;
use conduit_core::{
    config::AppConfig,
    scheduler::{
        ApproveParams, BatchObserver, BatchReport, ExecutionContext, FeeEstimator, FeeQuote,
        HandlerOutput, Operation, OperationError, OperationHandler, OperationPayload,
        OperationStatus, TransferParams, VoteParams,
    },
    Conduit,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

const TRANSFER_FEE: u128 = 21_000;

/// Submits transfers and approvals as raw calls and records the order they ran in.
#[derive(Default)]
struct WalletHandler {
    executed: Mutex<Vec<String>>,
}

impl WalletHandler {
    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

fn tx_hash(value: &serde_json::Value) -> Result<String, OperationError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| OperationError::handler("response carried no transaction hash"))
}

#[async_trait]
impl OperationHandler for WalletHandler {
    async fn approve(
        &self,
        ctx: &ExecutionContext,
        params: &ApproveParams,
    ) -> Result<HandlerOutput, OperationError> {
        let result = ctx
            .request(
                "eth_sendTransaction",
                Some(json!([{ "to": params.token, "spender": params.spender }])),
            )
            .await?;
        self.executed.lock().push(format!("approve:{}", params.spender));
        let hash = tx_hash(&result)?;
        Ok(HandlerOutput::new(result).with_external_id(hash))
    }

    async fn transfer(
        &self,
        ctx: &ExecutionContext,
        params: &TransferParams,
    ) -> Result<HandlerOutput, OperationError> {
        let result = ctx
            .request(
                "eth_sendTransaction",
                Some(json!([{ "to": params.to, "value": params.amount }])),
            )
            .await?;
        self.executed.lock().push(format!("transfer:{}", params.to));
        let hash = tx_hash(&result)?;
        Ok(HandlerOutput::new(result)
            .with_external_id(hash)
            .with_fee(ctx.clamp_fee(TRANSFER_FEE)))
    }
}

fn transfer(to: &str) -> Operation {
    Operation::new(OperationPayload::Transfer(TransferParams {
        to: to.to_string(),
        amount: "0x1".to_string(),
    }))
}

fn approve(spender: &str) -> Operation {
    Operation::new(OperationPayload::Approve(ApproveParams {
        token: "0xtoken".to_string(),
        spender: spender.to_string(),
        amount: "0xff".to_string(),
    }))
}

fn sequential(mut config: AppConfig) -> AppConfig {
    config.scheduler.concurrency_window = 1;
    config
}

fn build(config: AppConfig, handler: Arc<WalletHandler>) -> Conduit {
    Conduit::builder()
        .with_config(config)
        .with_handler(handler)
        .disable_health_checker()
        .build()
        .expect("build")
}

#[tokio::test]
async fn test_transfer_records_hash_and_fee() {
    let mut node = RpcMockBuilder::new().await;
    node.expect_calls("eth_sendTransaction", json!("0xabc"), 1);
    let handler = Arc::new(WalletHandler::default());
    let conduit = build(conduit_config(&[&node]), Arc::clone(&handler));
    conduit.start();

    let id = conduit.submit(transfer("0xbob")).unwrap();
    let outcome = conduit.wait_for_result(&id).await.unwrap().unwrap();

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.output.external_id.as_deref(), Some("0xabc"));
    assert_eq!(outcome.output.fee_spent, TRANSFER_FEE);
    assert_eq!(handler.executed(), vec!["transfer:0xbob"]);

    assert!(matches!(conduit.take_result(&id), Some(OperationStatus::Completed(_))));
    assert!(conduit.get_result(&id).is_none());

    node.assert();
    conduit.shutdown().await;
}

#[tokio::test]
async fn test_batch_runs_approvals_then_dependencies_in_order() {
    let mut node = RpcMockBuilder::new().await;
    node.expect_calls("eth_sendTransaction", json!("0x01"), 4);
    let handler = Arc::new(WalletHandler::default());
    let conduit = build(sequential(conduit_config(&[&node])), Arc::clone(&handler));
    conduit.start();

    // Submitted out of order: carol waits on bob, bob on alice, and the approval
    // joins the batch last.
    let alice = transfer("alice");
    let bob = transfer("bob").depends_on(alice.id);
    let carol = transfer("carol").depends_on(bob.id);
    let allowance = approve("router");
    let ids = conduit.submit_batch(vec![carol, bob, alice, allowance]).unwrap();

    for id in &ids {
        assert!(conduit.wait_for_result(id).await.unwrap().is_ok());
    }
    assert_eq!(
        handler.executed(),
        vec!["approve:router", "transfer:alice", "transfer:bob", "transfer:carol"]
    );

    node.assert();
    conduit.shutdown().await;
}

#[tokio::test]
async fn test_conflicting_submission_is_requeued_until_retries_run_out() {
    let mut a = RpcMockBuilder::new().await;
    a.mock_rpc_error("eth_sendTransaction", -32000, "nonce too low");
    let mut b = RpcMockBuilder::new().await;
    b.mock_rpc_error("eth_sendTransaction", -32000, "nonce too low");
    let mut config = conduit_config(&[&a, &b]);
    config.retry.max_retries = 0;
    config.scheduler.max_retries = 1;
    let conduit = build(config, Arc::new(WalletHandler::default()));
    conduit.start();

    let id = conduit.submit(transfer("dave")).unwrap();
    let error = conduit.wait_for_result(&id).await.unwrap().unwrap_err();

    assert!(
        matches!(error, OperationError::MaxRetriesExceeded { attempts: 2, .. }),
        "got {error:?}"
    );
    assert!(matches!(conduit.get_result(&id), Some(OperationStatus::Failed { attempts: 2, .. })));

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let metrics = conduit.get_metrics();
    assert_eq!(metrics.scheduler.operations_retried, 1);
    assert_eq!(metrics.scheduler.operations_failed, 1);
    // Each attempt failed on its own endpoint and opened that endpoint's breaker.
    for endpoint in &metrics.endpoints {
        assert_eq!(endpoint.failed_requests, 1, "{}", endpoint.name);
    }
    assert_eq!(metrics.healthy_endpoints, 0);

    conduit.shutdown().await;
}

struct CappedFee(u128);

#[async_trait]
impl FeeEstimator for CappedFee {
    async fn estimate(&self, _operation: &Operation) -> Result<FeeQuote, OperationError> {
        Ok(FeeQuote { max_fee: self.0, limit: 21_000 })
    }
}

#[derive(Default)]
struct ReportLog(Mutex<Vec<BatchReport>>);

impl BatchObserver for ReportLog {
    fn on_batch_completed(&self, report: &BatchReport) {
        self.0.lock().push(report.clone());
    }
}

#[tokio::test]
async fn test_fee_ceiling_and_batch_reports() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result("eth_sendTransaction", json!("0xfee"));
    let observer = Arc::new(ReportLog::default());
    let conduit = Conduit::builder()
        .with_config(conduit_config(&[&node]))
        .with_handler(Arc::new(WalletHandler::default()))
        .with_fee_estimator(Arc::new(CappedFee(5_000)))
        .with_observer(Arc::clone(&observer) as Arc<dyn BatchObserver>)
        .disable_health_checker()
        .build()
        .unwrap();
    conduit.start();

    let ids = conduit.submit_batch(vec![transfer("erin"), transfer("frank")]).unwrap();
    for id in &ids {
        let outcome = conduit.wait_for_result(id).await.unwrap().unwrap();
        assert_eq!(outcome.output.fee_spent, 5_000);
    }

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let reports = observer.0.lock().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].size, 2);
    assert_eq!(reports[0].succeeded, 2);
    assert!(reports[0].is_success());

    let metrics = conduit.get_metrics();
    assert_eq!(metrics.scheduler.total_batches, 1);
    assert_eq!(metrics.scheduler.batch_success_rate, 1.0);

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_operation_fails_without_retry() {
    let node = RpcMockBuilder::new().await;
    let conduit = build(conduit_config(&[&node]), Arc::new(WalletHandler::default()));
    conduit.start();

    let vote = Operation::new(OperationPayload::Vote(VoteParams {
        proposal_id: "7".to_string(),
        support: true,
    }));
    let id = conduit.submit(vote).unwrap();
    let error = conduit.wait_for_result(&id).await.unwrap().unwrap_err();
    assert!(matches!(error, OperationError::Unsupported(_)));

    conduit.shutdown().await;
}
