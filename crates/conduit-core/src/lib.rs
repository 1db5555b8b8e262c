//! # Conduit Core
//!
//! Client-side resilience and throughput layer in front of a set of interchangeable
//! JSON-RPC endpoints.
//!
//! - **[`upstream`]**: per-endpoint health ledgers and circuit breakers, a bounded
//!   connection pool, load balancing, and the retrying request executor.
//!
//! - **[`scheduler`]**: priority queue and batch scheduler for typed operations, with
//!   type-affinity grouping, dependency ordering, and re-queue on retryable failure.
//!
//! - **[`metrics`]**: point-in-time snapshots and optional Prometheus export.
//!
//! - **[`config`]**: layered configuration (defaults, TOML file, environment).
//!
//! - **[`runtime`]**: the [`Conduit`] facade that wires everything together.
//!
//! ## Architecture
//!
//! ```text
//!            submit / submit_batch                      request
//!                     │                                    │
//!                     ▼                                    │
//!          ┌─────────────────────┐                         │
//!          │   BatchScheduler    │                         │
//!          │ queue → group →     │                         │
//!          │ resolve → windows   │                         │
//!          └──────────┬──────────┘                         │
//!                     │ OperationHandler                   │
//!                     ▼                                    ▼
//!          ┌───────────────────────────────────────────────────┐
//!          │                  RequestExecutor                  │
//!          │   select ─► acquire ─► call ─► record ─► retry?   │
//!          └──────┬─────────────────┬──────────────────────────┘
//!                 │                 │
//!          ┌──────▼──────┐   ┌──────▼──────┐
//!          │LoadBalancer │   │ConnectionPool│──► Transport (HTTP)
//!          │ + breakers  │   └─────────────┘
//!          └─────────────┘
//! ```

pub mod config;
pub mod metrics;
pub mod runtime;
pub mod scheduler;
pub mod types;
pub mod upstream;

pub use runtime::{Conduit, ConduitBuilder};
