use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};

use crate::{
    types::{EndpointConfig, JsonRpcRequest, JsonRpcResponse},
    upstream::{
        errors::UpstreamError,
        transport::{Connection, Transport},
    },
};

/// Settings applied to every HTTP client the transport builds.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// TCP connect timeout for the underlying client.
    pub connect_timeout: Duration,
    /// Hard upper bound on a single HTTP exchange; the executor's attempt timeout is
    /// normally shorter.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(45),
            user_agent: concat!("conduit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// JSON-RPC over HTTP(S), built on `reqwest` with rustls.
///
/// Each pooled connection owns its own `reqwest::Client`, which keeps its own
/// keep-alive connections to the endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    config: HttpTransportConfig,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: HttpTransportConfig) -> Self {
        Self { config }
    }

    fn build_client(&self) -> Result<Client, UpstreamError> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(self.config.user_agent.clone())
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
    ) -> Result<Arc<dyn Connection>, UpstreamError> {
        let url = url::Url::parse(&endpoint.url).map_err(|e| {
            UpstreamError::ConnectionFailed(format!("invalid url for {}: {e}", endpoint.name))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamError::ConnectionFailed(format!(
                "unsupported scheme for {}: {}",
                endpoint.name,
                url.scheme()
            )));
        }

        let client = self.build_client()?;
        tracing::debug!(endpoint = %endpoint.name, "opened http connection");
        Ok(Arc::new(HttpConnection { client, url }))
    }
}

/// A single pooled HTTP handle.
pub struct HttpConnection {
    client: Client,
    url: url::Url,
}

/// Sanitizes network errors so endpoint URLs and credentials never reach callers.
fn sanitize_network_error(error: &reqwest::Error) -> String {
    if error.is_connect() {
        "connection refused or unreachable".to_string()
    } else if error.is_timeout() {
        "connection timed out".to_string()
    } else if error.is_request() {
        "request failed".to_string()
    } else if error.is_body() {
        "response body error".to_string()
    } else if error.is_decode() {
        "response decode error".to_string()
    } else {
        "network error".to_string()
    }
}

fn truncate_body(raw: String) -> String {
    if raw.len() > 256 {
        let mut end = 256;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &raw[..end])
    } else {
        raw
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn call(&self, request: &JsonRpcRequest) -> Result<serde_json::Value, UpstreamError> {
        let body = serde_json::to_vec(request).map_err(|e| {
            UpstreamError::InvalidRequest(format!("Failed to serialize request: {e}"))
        })?;

        let response = self
            .client
            .post(self.url.clone())
            .header("content-type", "application/json")
            .body(bytes::Bytes::from(body))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::RequestTimeout
                } else {
                    UpstreamError::ConnectionFailed(sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamError::HttpError(status.as_u16(), truncate_body(text)));
        }

        let bytes = response.bytes().await?;
        let parsed: JsonRpcResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(UpstreamError::RpcError(error.code, error.message));
        }

        Ok(parsed.result.unwrap_or(serde_json::Value::Null))
    }
}
