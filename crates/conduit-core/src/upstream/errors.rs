use thiserror::Error;

/// Classification of JSON-RPC errors for retry decisions.
///
/// - Client and execution errors are surfaced to the caller unchanged
/// - Provider errors, rate limits, and transaction conflicts are retried elsewhere
///
/// Every category still counts as a failed call in the endpoint's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCategory {
    /// Invalid request, method not found, invalid params.
    ClientError,
    /// Internal or server errors attributable to the endpoint.
    ProviderError,
    /// Rate limiting at JSON-RPC level (-32005) or a rate-limit message.
    RateLimit,
    /// Malformed response from the endpoint.
    ParseError,
    /// Reverts, out of gas, insufficient funds.
    ExecutionError,
    /// Fee too low, underpriced, nonce/sequence conflicts, duplicate submissions.
    ///
    /// The remote side rejected the call because of contention with other submissions;
    /// resubmitting after a delay usually succeeds.
    TransactionConflict,
}

const CONFLICT_MARKERS: &[&str] = &[
    "underpriced",
    "price too low",
    "fee too low",
    "nonce too low",
    "nonce too high",
    "sequence",
    "already known",
    "replacement transaction",
];

const EXECUTION_MARKERS: &[&str] =
    &["execution reverted", "out of gas", "revert", "insufficient funds", "gas too low"];

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "limit exceeded"];

impl RpcErrorCategory {
    /// Classifies a JSON-RPC error code and message into a category.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600..-32602: client errors
    /// - -32603: Internal error
    /// - -32005: Limit exceeded
    /// - -32000 to -32099: server errors, refined by message content
    #[must_use]
    pub fn from_code_and_message(code: i32, message: &str) -> Self {
        let message_lower = message.to_lowercase();

        if CONFLICT_MARKERS.iter().any(|m| message_lower.contains(m)) {
            return Self::TransactionConflict;
        }
        if RATE_LIMIT_MARKERS.iter().any(|m| message_lower.contains(m)) {
            return Self::RateLimit;
        }

        match code {
            -32700 => Self::ParseError,
            -32602..=-32600 => Self::ClientError,
            -32005 => Self::RateLimit,
            -32099..=-32000 if EXECUTION_MARKERS.iter().any(|m| message_lower.contains(m)) => {
                Self::ExecutionError
            }
            _ => Self::ProviderError,
        }
    }

    /// Returns `true` if the call may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ProviderError | Self::TransactionConflict)
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::ProviderError => "provider_error",
            Self::RateLimit => "rate_limit",
            Self::ParseError => "parse_error",
            Self::ExecutionError => "execution_error",
            Self::TransactionConflict => "transaction_conflict",
        }
    }
}

/// Errors produced on the direct request path.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// A single attempt, or the caller's overall deadline, ran out.
    #[error("Request timeout")]
    RequestTimeout,

    /// Establishing a new connection exceeded the pool's connect budget.
    #[error("Connection timeout for endpoint {0}")]
    ConnectionTimeout(String),

    /// Failed to establish a connection to the endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error object returned by the endpoint.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Every configured endpoint is open or excluded.
    #[error("No healthy endpoints available")]
    NoHealthyEndpoints,

    /// The caller pinned an endpoint whose breaker is open.
    #[error("Circuit breaker is open for endpoint {0}")]
    CircuitOpen(String),

    /// The endpoint has reached its connection cap.
    #[error("Connection pool exhausted for endpoint {0}")]
    PoolExhausted(String),

    /// The caller pinned an endpoint that is not configured.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Request validation failed before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Retries ran out; `source` is the error of the final attempt.
    #[error("Max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<UpstreamError>,
    },

    /// The executor is shutting down and no longer accepts work.
    #[error("Shutting down")]
    ShuttingDown,
}

impl UpstreamError {
    /// Returns the RPC error category if this is an RPC error.
    #[must_use]
    pub fn rpc_category(&self) -> Option<RpcErrorCategory> {
        match self {
            Self::RpcError(code, message) => {
                Some(RpcErrorCategory::from_code_and_message(*code, message))
            }
            _ => None,
        }
    }

    /// Returns `true` if the request should be retried against another endpoint.
    ///
    /// Transient errors include timeouts, network and connection failures, HTTP 5xx and
    /// 429, an exhausted pool, and RPC errors whose category is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestTimeout |
            Self::ConnectionTimeout(_) |
            Self::ConnectionFailed(_) |
            Self::Network(_) |
            Self::PoolExhausted(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            Self::RpcError(_, _) => self.rpc_category().is_some_and(|cat| cat.is_transient()),
            Self::MaxRetriesExceeded { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestTimeout => "request_timeout",
            Self::ConnectionTimeout(_) => "connection_timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_, _) => "rpc_error",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NoHealthyEndpoints => "no_healthy_endpoints",
            Self::CircuitOpen(_) => "circuit_open",
            Self::PoolExhausted(_) => "pool_exhausted",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_category_from_code() {
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32700, "parse error"),
            RpcErrorCategory::ParseError
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32601, "Method not found"),
            RpcErrorCategory::ClientError
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32603, "Internal error"),
            RpcErrorCategory::ProviderError
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32005, "slow down"),
            RpcErrorCategory::RateLimit
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32000, "server error"),
            RpcErrorCategory::ProviderError
        );
    }

    #[test]
    fn test_conflicts_take_precedence_over_code() {
        for message in [
            "transaction underpriced",
            "max fee per gas price too low",
            "nonce too low",
            "already known",
            "replacement transaction underpriced",
            "account sequence mismatch",
        ] {
            assert_eq!(
                RpcErrorCategory::from_code_and_message(-32000, message),
                RpcErrorCategory::TransactionConflict,
                "{message}"
            );
        }
    }

    #[test]
    fn test_execution_errors() {
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32000, "Execution Reverted: reason"),
            RpcErrorCategory::ExecutionError
        );
        assert_eq!(
            RpcErrorCategory::from_code_and_message(-32000, "insufficient funds for transfer"),
            RpcErrorCategory::ExecutionError
        );
        assert!(!RpcErrorCategory::ExecutionError.is_transient());
    }

    #[test]
    fn test_transient_errors() {
        assert!(UpstreamError::RequestTimeout.is_transient());
        assert!(UpstreamError::ConnectionTimeout("a".into()).is_transient());
        assert!(UpstreamError::ConnectionFailed("test".into()).is_transient());
        assert!(UpstreamError::HttpError(502, "Bad Gateway".into()).is_transient());
        assert!(UpstreamError::HttpError(429, "Too Many Requests".into()).is_transient());
        assert!(UpstreamError::PoolExhausted("a".into()).is_transient());
        assert!(UpstreamError::RpcError(-32000, "nonce too low".into()).is_transient());
        assert!(UpstreamError::RpcError(-32005, "Limit exceeded".into()).is_transient());

        assert!(!UpstreamError::InvalidRequest("bad".into()).is_transient());
        assert!(!UpstreamError::HttpError(404, "Not Found".into()).is_transient());
        assert!(!UpstreamError::RpcError(-32602, "Invalid params".into()).is_transient());
        assert!(!UpstreamError::RpcError(-32000, "execution reverted".into()).is_transient());
        assert!(!UpstreamError::NoHealthyEndpoints.is_transient());
        assert!(!UpstreamError::CircuitOpen("a".into()).is_transient());
        assert!(!UpstreamError::ShuttingDown.is_transient());
    }

    #[test]
    fn test_max_retries_exceeded_wraps_source() {
        let err = UpstreamError::MaxRetriesExceeded {
            attempts: 4,
            source: Box::new(UpstreamError::RequestTimeout),
        };
        assert_eq!(err.kind(), "max_retries_exceeded");
        assert!(err.to_string().contains("4 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
