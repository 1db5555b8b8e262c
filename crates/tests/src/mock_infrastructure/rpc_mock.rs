//! mockito-backed JSON-RPC endpoint.

use conduit_core::config::{AppConfig, EndpointSettings};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for mock JSON-RPC endpoints.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

fn method_matcher(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers `method` with a JSON-RPC `result`.
    pub fn mock_result(&mut self, method: &str, result: Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a JSON-RPC error object.
    pub fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": code, "message": message }
                })
                .to_string(),
            )
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers every request with an HTTP error status.
    pub fn mock_http_status(&mut self, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_body("upstream unavailable")
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers every request with a body that is not JSON.
    pub fn mock_garbage(&mut self) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("<html>not json</html>")
            .create();
        self.mocks.push(mock);
        self
    }

    /// Expects exactly `hits` requests for `method`, answered with `result`.
    pub fn expect_calls(&mut self, method: &str, result: Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .expect(hits)
            .create();
        self.mocks.push(mock);
        self
    }

    /// Asserts every mock met its hit expectation.
    pub fn assert(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}

/// Configuration with one endpoint per mock, fast retries, and the health checker off.
#[must_use]
pub fn conduit_config(mocks: &[&RpcMockBuilder]) -> AppConfig {
    let mut config = AppConfig::default();
    config.endpoints = mocks
        .iter()
        .enumerate()
        .map(|(i, mock)| EndpointSettings {
            name: format!("node-{i}"),
            url: mock.url(),
            max_connections: None,
            circuit_breaker_threshold: None,
        })
        .collect();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.request_timeout_ms = 2_000;
    config.scheduler.batch_interval_ms = 10;
    config.health_check.enabled = false;
    config
}
