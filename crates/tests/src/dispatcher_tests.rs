//! Store-or-delegate scenarios through the proxy engine.
//!
//! Every test runs the engine against a preloaded `MemoryStore` and a scripted node, and
//! checks both the answer and whether the node was contacted.

use crate::mock_infrastructure::{
    create_test_block, create_test_log, create_test_receipt, create_test_store,
    engine_with_store, hash, ScriptedClient,
};
use fluxgate_core::{
    middleware::RequestContext,
    node::Node,
    proxy::{ProxyEngine, ProxyError},
    store::{MemoryStore, Store},
    types::JsonRpcRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;

struct Fixture {
    store: Arc<MemoryStore>,
    client: Arc<ScriptedClient>,
    engine: ProxyEngine,
    ctx: RequestContext,
}

impl Fixture {
    fn new(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let client = ScriptedClient::new("full-1");
        let engine = engine_with_store(Some(Arc::clone(&store) as Arc<dyn Store>));

        let mut ctx = RequestContext::new("203.0.113.9", "dispatch-test");
        ctx.node = Some(Node::new("full-1", client.clone()));

        Self { store, client, engine, ctx }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ProxyError> {
        let request = JsonRpcRequest::new(method, Some(params), json!(1));
        self.engine.process_request(&self.ctx, &request).await
    }
}

#[tokio::test]
async fn test_block_by_hash_store_hit_skips_node() {
    let fx = Fixture::new(create_test_store(10..=12, 2));

    let block = fx.call("cfx_getBlockByHash", json!([hash(11), true])).await.unwrap();

    assert_eq!(block, create_test_block(11, 2));
    assert!(fx.client.calls().is_empty());
    assert_eq!(fx.engine.dispatcher().stats().get("cfx_getBlockByHash"), Some((1, 0)));
}

#[tokio::test]
async fn test_block_by_hash_without_full_transactions() {
    let fx = Fixture::new(create_test_store(10..=10, 2));

    let block = fx.call("cfx_getBlockByHash", json!([hash(10), false])).await.unwrap();

    assert_eq!(block["transactions"], json!([hash(10_000), hash(10_001)]));
    assert!(fx.client.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_hash_is_forwarded_verbatim() {
    let fx = Fixture::new(create_test_store(10..=10, 1));
    fx.client.answer("cfx_getBlockByHash", json!({ "from": "node" }));

    let params = json!(["0xabc", false]);
    let value = fx.call("cfx_getBlockByHash", params.clone()).await.unwrap();

    assert_eq!(value, json!({ "from": "node" }));
    assert_eq!(fx.store.lookups(), 0);
    assert_eq!(fx.client.calls(), vec![("cfx_getBlockByHash".to_string(), params)]);
}

#[tokio::test]
async fn test_store_miss_falls_back_to_node() {
    let fx = Fixture::new(create_test_store(10..=10, 1));
    fx.client.answer("cfx_getBlockByHash", json!({ "hash": hash(99) }));

    let value = fx.call("cfx_getBlockByHash", json!([hash(99), false])).await.unwrap();

    assert_eq!(value["hash"], json!(hash(99)));
    assert_eq!(fx.store.lookups(), 1);
    assert_eq!(fx.client.call_count("cfx_getBlockByHash"), 1);
    assert_eq!(fx.engine.dispatcher().stats().get("cfx_getBlockByHash"), Some((0, 1)));
}

#[tokio::test]
async fn test_unavailable_store_falls_back_to_node() {
    let store = create_test_store(10..=10, 1);
    store.set_unavailable(true);
    let fx = Fixture::new(store);
    fx.client.answer("cfx_getTransactionReceipt", json!({ "from": "node" }));

    let value = fx.call("cfx_getTransactionReceipt", json!([hash(10_000)])).await.unwrap();

    assert_eq!(value, json!({ "from": "node" }));
    assert_eq!(fx.client.call_count("cfx_getTransactionReceipt"), 1);
}

#[tokio::test]
async fn test_receipt_store_hit() {
    let fx = Fixture::new(create_test_store(10..=10, 3));

    let receipt = fx.call("cfx_getTransactionReceipt", json!([hash(10_002)])).await.unwrap();

    assert_eq!(receipt, create_test_receipt(10, 2));
    assert!(fx.client.calls().is_empty());
}

#[tokio::test]
async fn test_pruned_epoch_logs_are_too_old() {
    let store = create_test_store(10..=20, 1);
    store.prune_below(15);
    let fx = Fixture::new(store);

    let err = fx
        .call("cfx_getLogs", json!([{ "fromEpoch": "0xb", "toEpoch": "0x10" }]))
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::DataTooOld));
    assert_eq!(fx.client.call_count("cfx_getLogs"), 0);
}

#[tokio::test]
async fn test_epoch_logs_served_from_store() {
    let fx = Fixture::new(create_test_store(10..=20, 2));

    let logs = fx
        .call("cfx_getLogs", json!([{ "fromEpoch": "0xc", "toEpoch": "0xd" }]))
        .await
        .unwrap();

    let expected: Vec<Value> = [(12, 0), (12, 1), (13, 0), (13, 1)]
        .into_iter()
        .map(|(epoch, index)| create_test_log(epoch, index))
        .collect();
    assert_eq!(logs, Value::Array(expected));
    assert_eq!(fx.client.call_count("cfx_getLogs"), 0);
}

#[tokio::test]
async fn test_unbounded_epoch_filter_resolves_tags_on_node() {
    // The scripted node reports epoch 0x64 for every tag, so the range becomes [100, 100].
    let fx = Fixture::new(create_test_store(98..=100, 1));

    let logs = fx.call("cfx_getLogs", json!([{}])).await.unwrap();

    assert_eq!(logs, json!([create_test_log(100, 0)]));
    let tags: Vec<Value> = fx
        .client
        .calls()
        .into_iter()
        .filter(|(method, _)| method == "cfx_epochNumber")
        .map(|(_, params)| params)
        .collect();
    assert_eq!(tags, vec![json!(["latest_checkpoint"]), json!(["latest_state"])]);
}

#[tokio::test]
async fn test_unresolved_epoch_tag_bypasses_store() {
    let fx = Fixture::new(create_test_store(0..=5, 1));
    fx.client.fail("cfx_epochNumber", -32000, "epoch not available");
    fx.client.answer("cfx_getLogs", json!([{ "from": "node" }]));

    let logs = fx
        .call("cfx_getLogs", json!([{ "fromEpoch": "0x0", "toEpoch": "latest_finalized" }]))
        .await
        .unwrap();

    assert_eq!(logs, json!([{ "from": "node" }]));
    assert_eq!(fx.store.lookups(), 0);
    assert_eq!(fx.client.call_count("cfx_getLogs"), 1);
    assert_eq!(fx.engine.dispatcher().stats().get("cfx_getLogs"), None);
}

#[tokio::test]
async fn test_multi_mode_filter_is_rejected_before_store() {
    let fx = Fixture::new(create_test_store(10..=10, 1));

    let err = fx
        .call("cfx_getLogs", json!([{ "fromEpoch": "0x1", "blockHashes": [hash(1)] }]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), -32602);
    assert_eq!(fx.store.lookups(), 0);
    assert_eq!(fx.client.call_count("cfx_getLogs"), 0);
}

#[tokio::test]
async fn test_node_errors_reach_caller_unchanged() {
    let fx = Fixture::new(MemoryStore::new());
    fx.client.fail("cfx_getBlockByHash", -32016, "block not found");

    let err = fx.call("cfx_getBlockByHash", json!([hash(5), false])).await.unwrap_err();
    let rpc = err.to_json_rpc_error();

    assert_eq!(rpc.code, -32016);
    assert_eq!(rpc.message, "block not found");
}

#[tokio::test]
async fn test_without_store_everything_is_delegated() {
    let client = ScriptedClient::new("full-1");
    client.answer("cfx_getBlockByHash", json!({ "from": "node" }));
    let engine = engine_with_store(None);
    let mut ctx = RequestContext::new("203.0.113.9", "no-store");
    ctx.node = Some(Node::new("full-1", client.clone()));

    let request =
        JsonRpcRequest::new("cfx_getBlockByHash", Some(json!([hash(1), false])), json!(1));
    let value = engine.process_request(&ctx, &request).await.unwrap();

    assert_eq!(value, json!({ "from": "node" }));
    assert_eq!(engine.dispatcher().stats().get("cfx_getBlockByHash"), None);
}
