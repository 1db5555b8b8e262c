use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    types::{EndpointConfig, JsonRpcRequest},
    upstream::errors::UpstreamError,
};

/// A live handle to one endpoint.
///
/// Connections are shared: the pool hands the same handle to concurrent callers, so
/// implementations must multiplex requests.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Sends one request and returns the JSON-RPC `result` value.
    ///
    /// # Errors
    ///
    /// Implementations map JSON-RPC error objects to [`UpstreamError::RpcError`] and
    /// transport failures to the matching connection or network variant.
    async fn call(&self, request: &JsonRpcRequest) -> Result<serde_json::Value, UpstreamError>;
}

/// Factory for [`Connection`]s, one per pooled slot.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new connection to `endpoint`.
    ///
    /// The pool bounds this call with its connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConnectionFailed`] if the endpoint cannot be reached.
    async fn connect(&self, endpoint: &EndpointConfig)
        -> Result<Arc<dyn Connection>, UpstreamError>;
}
