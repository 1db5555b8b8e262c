//! Endpoint management and the direct request path.
//!
//! This module turns a set of interchangeable remote endpoints into one resilient call
//! surface:
//! - Per-endpoint health ledger and failure-rate circuit breaker
//! - Load balancing across endpoints whose breaker isn't open
//! - Bounded, lazily created connection pool per endpoint
//! - Request execution with per-attempt timeouts, exponential backoff, and failover
//! - Background health checks that close recovered breakers
//!
//! # Request Flow
//!
//! ```text
//! RequestExecutor::execute
//!      │
//!      ├─ pinned endpoint? ── open ──> CircuitOpen
//!      │
//!      └─ LoadBalancer::select(exclude failed) ── none ──> NoHealthyEndpoints
//!              │
//!              └─ ConnectionPool::acquire ── at cap ──> try another endpoint
//!                      │
//!                      └─ Connection::call (attempt timeout)
//!                              │
//!                              ├─ Ok ──> record latency, close half-open breaker
//!                              │
//!                              └─ Err ──> record failure, update breaker,
//!                                         retry after backoff or surface
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod endpoint;
pub mod errors;
pub mod executor;
pub mod health;
pub mod http_client;
pub mod load_balancer;
pub mod pool;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use endpoint::{Endpoint, EndpointStats};
pub use errors::{RpcErrorCategory, UpstreamError};
pub use executor::{ExecutorConfig, PendingRequest, RequestExecutor, RequestOptions, RequestTotals};
pub use health::{HealthChecker, ProbeResult};
pub use http_client::{HttpConnection, HttpTransport, HttpTransportConfig};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use pool::{ConnectionLease, ConnectionPool, PooledConnection};
pub use transport::{Connection, Transport};
