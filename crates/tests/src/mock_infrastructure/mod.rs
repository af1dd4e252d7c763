//! Mock infrastructure for the integration tests.
//!
//! ## Components
//!
//! - `RpcMockBuilder`: mockito-backed HTTP JSON-RPC node
//! - `ScriptedClient`: in-process `NodeClient` with scripted answers, health and streams
//! - `MockWebSocketServer`: Conflux WebSocket endpoint for subscription tests
//! - Fixtures for blocks, transactions, receipts, logs and a preloaded `MemoryStore`
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{endpoint, RpcMockBuilder};
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_epoch_number(100);
//! let config = endpoint("full-1", &mock.url(), None);
//! ```

pub mod rpc_mock;
pub mod scripted_client;
pub mod test_helpers;

pub use rpc_mock::RpcMockBuilder;
pub use scripted_client::ScriptedClient;
pub use test_helpers::*;
pub use websocket_mock::{MockWebSocketServer, MOCK_SUBSCRIPTION_ID};
