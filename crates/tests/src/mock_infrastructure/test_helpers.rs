//! Conflux-shaped fixtures and small builders shared by the integration tests.

use fluxgate_core::{
    config::{BackendKind, NodeEndpoint},
    filter::FilterLimits,
    node::Node,
    proxy::{ProxyEngine, RequestDispatcher},
    store::{MemoryStore, Store},
    types::Hash32,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

/// Canonical 32-byte hash derived from `seed`.
#[must_use]
pub fn hash(seed: u64) -> String {
    format!("0x{seed:064x}")
}

#[must_use]
pub fn hash32(seed: u64) -> Hash32 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    Hash32(bytes)
}

#[must_use]
pub fn create_test_transaction(epoch: u64, index: u64) -> Value {
    json!({
        "hash": hash(epoch * 1000 + index),
        "nonce": format!("0x{index:x}"),
        "blockHash": hash(epoch),
        "transactionIndex": format!("0x{index:x}"),
        "from": "cfx:aak2rra2njvd77ezwjvx04kkds9fzagfe6ku8scz91",
        "to": "cfx:acc7uawf5ubtnmezvhu9dhc6sghea0403y2dgpyfjp",
        "value": "0x0",
        "gas": "0x5208",
        "gasPrice": "0x1",
        "epochHeight": format!("0x{epoch:x}"),
        "data": "0x",
        "status": "0x0"
    })
}

/// A pivot block of `epoch` with `tx_count` full transactions.
#[must_use]
pub fn create_test_block(epoch: u64, tx_count: u64) -> Value {
    let transactions: Vec<Value> =
        (0..tx_count).map(|i| create_test_transaction(epoch, i)).collect();

    json!({
        "hash": hash(epoch),
        "parentHash": hash(epoch.saturating_sub(1)),
        "epochNumber": format!("0x{epoch:x}"),
        "blockNumber": format!("0x{epoch:x}"),
        "height": format!("0x{epoch:x}"),
        "timestamp": format!("0x{:x}", 1_600_000_000 + epoch),
        "miner": "cfx:aamgvyzht7h1zxdghb9ee9w26wrz8rd3gj837392dp",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "transactions": transactions,
    })
}

#[must_use]
pub fn create_test_receipt(epoch: u64, index: u64) -> Value {
    json!({
        "transactionHash": hash(epoch * 1000 + index),
        "index": format!("0x{index:x}"),
        "blockHash": hash(epoch),
        "epochNumber": format!("0x{epoch:x}"),
        "gasUsed": "0x5208",
        "outcomeStatus": "0x0",
        "logs": []
    })
}

#[must_use]
pub fn create_test_log(epoch: u64, index: u64) -> Value {
    json!({
        "address": "cfx:acc7uawf5ubtnmezvhu9dhc6sghea0403y2dgpyfjp",
        "topics": [hash(index)],
        "data": "0x",
        "blockHash": hash(epoch),
        "epochNumber": format!("0x{epoch:x}"),
        "transactionHash": hash(epoch * 1000 + index),
        "logIndex": format!("0x{index:x}")
    })
}

/// Store preloaded with one block, its transactions, receipts and logs per epoch in
/// `epochs`.
#[must_use]
pub fn create_test_store(epochs: std::ops::RangeInclusive<u64>, txs_per_block: u64) -> MemoryStore {
    let store = MemoryStore::new();
    for epoch in epochs {
        store.insert_block(hash32(epoch), epoch, create_test_block(epoch, txs_per_block));
        for index in 0..txs_per_block {
            let tx_hash = hash32(epoch * 1000 + index);
            store.insert_transaction(tx_hash, create_test_transaction(epoch, index));
            store.insert_receipt(tx_hash, create_test_receipt(epoch, index));
        }
        store.insert_logs(epoch, (0..txs_per_block).map(|i| create_test_log(epoch, i)).collect());
    }
    store
}

#[must_use]
pub fn endpoint(name: &str, url: &str, ws_url: Option<String>) -> NodeEndpoint {
    NodeEndpoint { name: name.into(), url: url.into(), ws_url, timeout_seconds: 2 }
}

/// Cfx engine reading from `store` with default filter limits and no relay.
#[must_use]
pub fn engine_with_store(store: Option<Arc<dyn Store>>) -> ProxyEngine {
    ProxyEngine::new(
        BackendKind::Cfx,
        RequestDispatcher::new(store, None),
        FilterLimits::default(),
        None,
        None,
    )
}

/// Polls `node` until its availability equals `available` or `timeout` passes.
pub async fn wait_for_availability(node: &Node, available: bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if node.is_available() == available {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    node.is_available() == available
}
