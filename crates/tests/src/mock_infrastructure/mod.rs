//! Mock JSON-RPC endpoints for integration tests.
//!
//! `RpcMockBuilder` wraps a mockito server and answers JSON-RPC methods with canned
//! results, errors, or HTTP failures, without any real network dependency.
//!
//! ```ignore
//! use tests::mock_infrastructure::RpcMockBuilder;
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_result("eth_blockNumber", json!("0x10"));
//! // point an endpoint at mock.url()
//! ```

pub mod rpc_mock;

pub use rpc_mock::{conduit_config, RpcMockBuilder};
