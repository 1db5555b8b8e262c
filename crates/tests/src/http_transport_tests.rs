//! The reqwest transport against mocked JSON-RPC servers.

use crate::mock_infrastructure::RpcMockBuilder;
use conduit_core::{
    types::{EndpointConfig, JsonRpcRequest},
    upstream::{Connection, HttpTransport, RpcErrorCategory, Transport, UpstreamError},
};
use serde_json::json;
use std::sync::Arc;

async fn connect(mock: &RpcMockBuilder) -> Arc<dyn Connection> {
    let endpoint =
        EndpointConfig { name: Arc::from("mock"), url: mock.url(), ..Default::default() };
    HttpTransport::default().connect(&endpoint).await.expect("connect")
}

fn request(method: &str) -> JsonRpcRequest {
    JsonRpcRequest::new(method, None, json!(1))
}

#[tokio::test]
async fn test_result_is_returned() {
    let mut mock = RpcMockBuilder::new().await;
    mock.expect_calls("eth_blockNumber", json!("0x1b4"), 2);
    let connection = connect(&mock).await;

    // The same handle serves consecutive calls.
    assert_eq!(connection.call(&request("eth_blockNumber")).await.unwrap(), json!("0x1b4"));
    assert_eq!(connection.call(&request("eth_blockNumber")).await.unwrap(), json!("0x1b4"));
    mock.assert();
}

#[tokio::test]
async fn test_rpc_error_is_classified() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("eth_sendRawTransaction", -32000, "replacement transaction underpriced");
    mock.mock_rpc_error("eth_call", -32602, "invalid argument 0");
    let connection = connect(&mock).await;

    let conflict = connection.call(&request("eth_sendRawTransaction")).await.unwrap_err();
    assert!(matches!(conflict, UpstreamError::RpcError(-32000, _)));
    assert_eq!(conflict.rpc_category(), Some(RpcErrorCategory::TransactionConflict));
    assert!(conflict.is_transient());

    let invalid = connection.call(&request("eth_call")).await.unwrap_err();
    assert_eq!(invalid.rpc_category(), Some(RpcErrorCategory::ClientError));
    assert!(!invalid.is_transient());
}

#[tokio::test]
async fn test_http_status_maps_to_http_error() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_http_status(503);
    let connection = connect(&mock).await;

    let err = connection.call(&request("eth_chainId")).await.unwrap_err();
    match &err {
        UpstreamError::HttpError(503, body) => assert!(body.contains("unavailable")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_http_status(429);
    let connection = connect(&mock).await;

    let err = connection.call(&request("eth_chainId")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::HttpError(429, _)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_garbage_body_is_invalid_response() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_garbage();
    let connection = connect(&mock).await;

    let err = connection.call(&request("eth_chainId")).await.unwrap_err();
    assert!(matches!(err, UpstreamError::InvalidResponse(_)));
}
