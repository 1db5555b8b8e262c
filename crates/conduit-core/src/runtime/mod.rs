//! Conduit runtime initialization and lifecycle management.
//!
//! [`Conduit`] wires the endpoint ledgers, connection pool, load balancer, request
//! executor, batch scheduler, and health checker together from one [`AppConfig`],
//! and exposes the caller-facing operations on top of them.
//!
//! # Examples
//!
//! ## Batched operations
//!
//! ```no_run
//! use conduit_core::{
//!     config::AppConfig,
//!     scheduler::{Operation, OperationPayload},
//!     Conduit,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conduit = Conduit::builder().with_config(AppConfig::load()?).build()?;
//!     conduit.start();
//!
//!     let id = conduit.submit(Operation::new(OperationPayload::call("eth_blockNumber", None)))?;
//!     let outcome = conduit.wait_for_result(&id).await;
//!     println!("{outcome:?}");
//!
//!     conduit.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Direct requests
//!
//! ```no_run
//! # use conduit_core::{config::AppConfig, Conduit};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conduit = Conduit::builder().with_config(AppConfig::load()?).build()?;
//! let block = conduit.request("eth_blockNumber", None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`AppConfig`]: crate::config::AppConfig

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{BuilderError, ConduitBuilder};
pub use components::ConduitComponents;
pub use lifecycle::Conduit;
