//! Retries, failover, and circuit breaking across real HTTP endpoints.

use crate::mock_infrastructure::{conduit_config, RpcMockBuilder};
use conduit_core::{
    metrics::HealthAlert,
    upstream::{CircuitBreakerState, RequestOptions, UpstreamError},
    Conduit,
};
use serde_json::json;

fn build(config: conduit_core::config::AppConfig) -> Conduit {
    Conduit::builder().with_config(config).disable_health_checker().build().expect("build")
}

#[tokio::test]
async fn test_failing_endpoint_is_skipped_after_breaker_opens() {
    let mut broken = RpcMockBuilder::new().await;
    broken.mock_http_status(500);
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_result("eth_blockNumber", json!("0x10"));

    let conduit = build(conduit_config(&[&broken, &healthy]));

    for _ in 0..3 {
        let result = conduit.request("eth_blockNumber", None).await.unwrap();
        assert_eq!(result, json!("0x10"));
    }

    let metrics = conduit.get_metrics();
    let node0 = metrics.endpoints.iter().find(|e| e.name == "node-0").unwrap();
    let node1 = metrics.endpoints.iter().find(|e| e.name == "node-1").unwrap();

    // One 500 is enough to open at the default threshold; afterwards node-0 is skipped.
    assert_eq!(node0.circuit_state, CircuitBreakerState::Open);
    assert_eq!(node0.total_requests, 1);
    assert_eq!(node0.failed_requests, 1);
    assert_eq!(node1.circuit_state, CircuitBreakerState::Closed);
    assert_eq!(node1.total_requests, 3);

    assert_eq!(metrics.healthy_endpoints, 1);
    assert_eq!(metrics.requests.total, 3);
    assert_eq!(metrics.requests.successful, 3);
    assert!(metrics.alerts.contains(&HealthAlert::CircuitOpen { endpoint: "node-0".into() }));

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried_but_count_against_endpoint() {
    let mut node = RpcMockBuilder::new().await;
    node.mock_rpc_error("eth_call", -32602, "invalid argument 0: hex string without 0x prefix");
    let conduit = build(conduit_config(&[&node]));

    let err = conduit.request("eth_call", Some(json!([{}]))).await.unwrap_err();
    assert!(matches!(err, UpstreamError::RpcError(-32602, _)), "got {err:?}");

    let metrics = conduit.get_metrics();
    assert_eq!(metrics.endpoints[0].total_requests, 1);
    assert_eq!(metrics.endpoints[0].failed_requests, 1);
    assert_eq!(metrics.endpoints[0].circuit_state, CircuitBreakerState::Open);
    assert_eq!(metrics.requests.failed, 1);

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_all_endpoints_down_exhausts_retries() {
    let mut a = RpcMockBuilder::new().await;
    a.mock_http_status(502);
    let mut b = RpcMockBuilder::new().await;
    b.mock_http_status(502);
    let conduit = build(conduit_config(&[&a, &b]));

    let err = conduit.request("eth_chainId", None).await.unwrap_err();
    assert!(
        matches!(
            err,
            UpstreamError::MaxRetriesExceeded { .. } | UpstreamError::NoHealthyEndpoints
        ),
        "got {err:?}"
    );

    let metrics = conduit.get_metrics();
    assert_eq!(metrics.healthy_endpoints, 0);
    assert_eq!(metrics.request_success_rate, 0.0);

    conduit.shutdown().await;
}

#[tokio::test]
async fn test_pinned_endpoint_is_used() {
    let mut first = RpcMockBuilder::new().await;
    first.expect_calls("eth_chainId", json!("0x1"), 0);
    let mut second = RpcMockBuilder::new().await;
    second.expect_calls("eth_chainId", json!("0x89"), 2);
    let conduit = build(conduit_config(&[&first, &second]));

    let options = RequestOptions::default().with_endpoint("node-1");
    for _ in 0..2 {
        let result = conduit.request_with("eth_chainId", None, options.clone()).await.unwrap();
        assert_eq!(result, json!("0x89"));
    }

    first.assert();
    second.assert();
    conduit.shutdown().await;
}

#[tokio::test]
async fn test_unknown_pinned_endpoint_is_rejected() {
    let node = RpcMockBuilder::new().await;
    let conduit = build(conduit_config(&[&node]));

    let options = RequestOptions::default().with_endpoint("nowhere");
    let err = conduit.request_with("eth_chainId", None, options).await.unwrap_err();
    assert!(matches!(err, UpstreamError::UnknownEndpoint(name) if name == "nowhere"));

    conduit.shutdown().await;
}
