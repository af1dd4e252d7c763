//! RPC mock builder for Conflux JSON-RPC nodes.
//!
//! Wraps mockito with helpers for the methods the gateway probes and forwards.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// A mockito server answering JSON-RPC calls by method name.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

fn method_matcher(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
}

fn result_body(result: &Value) -> String {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers `method` with `result`, whatever the params.
    pub fn mock_method(&mut self, method: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(result))
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers the health probe (`cfx_epochNumber`) with `epoch`.
    pub fn mock_epoch_number(&mut self, epoch: u64) -> &mut Self {
        self.mock_method("cfx_epochNumber", &json!(format!("0x{epoch:x}")))
    }

    /// Answers `cfx_getBlockByHash` for one hash.
    pub fn mock_get_block_by_hash(&mut self, hash: &str, block: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                method_matcher("cfx_getBlockByHash"),
                Matcher::Regex(format!(r#""params"\s*:\s*\["{hash}""#)),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(result_body(block))
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `cfx_getLogs` with `logs`.
    pub fn mock_get_logs(&mut self, logs: &[Value]) -> &mut Self {
        self.mock_method("cfx_getLogs", &Value::Array(logs.to_vec()))
    }

    /// Answers `method` with a JSON-RPC error.
    pub fn mock_rpc_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": code, "message": message }
                })
                .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    /// Fails every call with HTTP 500. Call [`RpcMockBuilder::reset`] first so no earlier
    /// mock still answers.
    pub fn mock_server_error(&mut self) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(500)
            .with_body("Internal Server Error")
            .create();

        self.mocks.push(mock);
        self
    }

    /// Removes every mock registered so far.
    pub fn reset(&mut self) -> &mut Self {
        for mock in self.mocks.drain(..) {
            mock.remove();
        }
        self
    }
}
