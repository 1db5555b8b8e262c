//! Start/shutdown semantics of the `Conduit` facade.

use crate::mock_infrastructure::{conduit_config, RpcMockBuilder};
use conduit_core::{
    scheduler::{Operation, OperationError, OperationPayload, OperationStatus},
    upstream::UpstreamError,
    Conduit,
};
use serde_json::json;
use std::time::Duration;

fn build(node: &RpcMockBuilder) -> Conduit {
    Conduit::builder()
        .with_config(conduit_config(&[node]))
        .disable_health_checker()
        .build()
        .expect("build")
}

fn call(method: &str) -> Operation {
    Operation::new(OperationPayload::call(method, None))
}

#[tokio::test]
async fn test_queued_operations_wait_for_start() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result("eth_chainId", json!("0x1"));
    let conduit = build(&node);

    let id = conduit.submit(call("eth_chainId")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conduit.get_result(&id), Some(OperationStatus::Queued));
    assert_eq!(conduit.get_metrics().queue_depth, 1);

    conduit.start();
    conduit.start();
    let outcome = conduit.wait_for_result(&id).await.unwrap().unwrap();
    assert_eq!(outcome.output.result, json!("0x1"));

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_cancel_only_while_queued() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_result("eth_chainId", json!("0x1"));
    let conduit = build(&node);

    let cancelled = conduit.submit(call("eth_chainId")).unwrap();
    assert!(conduit.cancel(&cancelled));
    assert!(!conduit.cancel(&cancelled));

    conduit.start();
    let kept = conduit.submit(call("eth_chainId")).unwrap();
    conduit.wait_for_result(&kept).await.unwrap().unwrap();
    assert!(!conduit.cancel(&kept));
    assert_eq!(conduit.get_metrics().scheduler.operations_cancelled, 1);

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_queued_work_and_rejects_new_work() {
    let node = RpcMockBuilder::new().await;
    let conduit = build(&node);

    // Never started, so the operation is still queued when shutdown begins.
    let queued = conduit.submit(call("eth_chainId")).unwrap();

    conduit.shutdown().await;
    conduit.shutdown().await;

    assert!(matches!(
        conduit.get_result(&queued),
        Some(OperationStatus::Failed { error: OperationError::ShuttingDown, .. })
    ));
    assert!(matches!(conduit.submit(call("eth_chainId")), Err(OperationError::ShuttingDown)));
    assert!(matches!(
        conduit.request("eth_chainId", None).await,
        Err(UpstreamError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_duplicate_ids_are_rejected() {
    let node = RpcMockBuilder::new().await;
    let conduit = build(&node);

    let op = call("eth_chainId");
    let duplicate = op.clone();
    conduit.submit(op).unwrap();
    assert!(matches!(conduit.submit(duplicate), Err(OperationError::Invalid(_))));

    conduit.shutdown().await;
}
