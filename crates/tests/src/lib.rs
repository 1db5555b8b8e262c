//! Integration tests for the Conduit execution core.
//!
//! - `http_transport_tests`: the reqwest transport against mocked JSON-RPC servers
//! - `failover_tests`: retries, failover, and circuit breaking across real HTTP endpoints
//! - `scheduler_tests`: batched operations end to end through a custom handler
//! - `runtime_tests`: start/shutdown semantics of the `Conduit` facade
//! - `mock_infrastructure`: reusable mockito wrappers
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod http_transport_tests;

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod scheduler_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
