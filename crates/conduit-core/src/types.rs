//! Core type definitions for JSON-RPC and endpoint configuration.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: Protocol conformance
//!
//! ## Configuration Types
//! - [`EndpointConfig`]: Runtime view of one configured endpoint

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc, time::Duration};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request structure.
///
/// `id` is wrapped in an `Arc` so retries can re-send the same request without
/// deep-copying the identifier.
///
/// # Example
///
/// ```
/// use conduit_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("eth_blockNumber", None, json!(1));
/// assert_eq!(request.method, "eth_blockNumber");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

/// JSON-RPC 2.0 response structure.
///
/// A response contains either a `result` (success) or an `error` (failure), but never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Runtime configuration of a single remote endpoint.
///
/// Built from [`crate::config::EndpointSettings`] at startup; endpoints are never
/// discovered at runtime.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Unique name used in logs, metrics labels, and request affinity.
    pub name: Arc<str>,
    /// Transport URL (HTTP(S) for the default transport).
    pub url: String,
    /// Failure rate in `(0, 1]` at which the circuit breaker opens.
    pub circuit_breaker_threshold: f64,
    /// Time spent in `Open` before the breaker moves to `HalfOpen`.
    pub circuit_breaker_timeout: Duration,
    /// Maximum number of pooled connections for this endpoint.
    pub max_connections: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: Arc::from(""),
            url: String::new(),
            circuit_breaker_threshold: 0.5,
            circuit_breaker_timeout: Duration::from_secs(30),
            max_connections: 4,
        }
    }
}
