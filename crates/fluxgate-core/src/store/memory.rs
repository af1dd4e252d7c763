use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::{Store, StoreError, StoreKey, StoreQuery};
use crate::{
    filter::FilterMode,
    types::{parse_quantity, Hash32},
};

/// In-process store indexed by hash and epoch.
///
/// Useful for tests and small deployments that preload recent history. Epochs below the
/// prune watermark report [`StoreError::Pruned`].
#[derive(Default)]
pub struct MemoryStore {
    blocks_by_hash: DashMap<Hash32, Value>,
    blocks_by_epoch: DashMap<u64, Vec<Value>>,
    blocks_by_number: DashMap<u64, Value>,
    transactions: DashMap<Hash32, Value>,
    receipts: DashMap<Hash32, Value>,
    logs_by_epoch: DashMap<u64, Vec<Value>>,
    pruned_below: AtomicU64,
    unavailable: AtomicBool,
    lookups: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block under its hash, its epoch and (when present) its block number.
    /// The last block inserted for an epoch is its pivot.
    pub fn insert_block(&self, hash: Hash32, epoch: u64, block: Value) {
        let number = block.get("blockNumber").and_then(Value::as_str).and_then(parse_quantity);
        if let Some(number) = number {
            self.blocks_by_number.insert(number, block.clone());
        }
        self.blocks_by_epoch.entry(epoch).or_default().push(block.clone());
        self.blocks_by_hash.insert(hash, block);
    }

    pub fn insert_transaction(&self, hash: Hash32, tx: Value) {
        self.transactions.insert(hash, tx);
    }

    pub fn insert_receipt(&self, hash: Hash32, receipt: Value) {
        self.receipts.insert(hash, receipt);
    }

    pub fn insert_logs(&self, epoch: u64, logs: Vec<Value>) {
        self.logs_by_epoch.insert(epoch, logs);
    }

    /// Epochs strictly below `epoch` are treated as pruned.
    pub fn prune_below(&self, epoch: u64) {
        self.pruned_below.store(epoch, Ordering::Release);
        self.logs_by_epoch.retain(|e, _| *e >= epoch);
        self.blocks_by_epoch.retain(|e, _| *e >= epoch);
    }

    /// Simulates a backend outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of lookups served so far, including failed ones.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Acquire)
    }

    fn check_pruned(&self, epoch: u64) -> Result<(), StoreError> {
        if epoch < self.pruned_below.load(Ordering::Acquire) {
            return Err(StoreError::Pruned);
        }
        Ok(())
    }

    fn block_view(block: &Value, include_txs: bool) -> Value {
        if include_txs {
            return block.clone();
        }
        let mut block = block.clone();
        if let Some(txs) = block.get_mut("transactions").and_then(Value::as_array_mut) {
            for tx in txs.iter_mut() {
                if let Some(hash) = tx.get("hash").cloned() {
                    *tx = hash;
                }
            }
        }
        block
    }

    fn logs(&self, query: &StoreQuery) -> Result<Value, StoreError> {
        let StoreKey::Logs(filter) = &query.key else {
            return Err(StoreError::NotFound);
        };
        if filter.mode() != FilterMode::EpochRange {
            return Err(StoreError::NotFound);
        }

        let from = filter.from_epoch.and_then(|e| e.as_number()).ok_or(StoreError::NotFound)?;
        let to = filter.to_epoch.and_then(|e| e.as_number()).ok_or(StoreError::NotFound)?;
        self.check_pruned(from)?;

        let mut logs = Vec::new();
        for epoch in from..=to {
            let entry = self.logs_by_epoch.get(&epoch).ok_or(StoreError::NotFound)?;
            logs.extend(entry.iter().cloned());
        }
        if let Some(limit) = filter.limit {
            let limit = usize::try_from(limit.0).unwrap_or(usize::MAX);
            if logs.len() > limit {
                logs.drain(..logs.len() - limit);
            }
        }
        Ok(Value::Array(logs))
    }
}

fn parse_hash(hash: &str) -> Result<Hash32, StoreError> {
    Hash32::try_from(hash).map_err(|_| StoreError::NotFound)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, query: &StoreQuery) -> Result<Value, StoreError> {
        self.lookups.fetch_add(1, Ordering::AcqRel);
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }

        match &query.key {
            StoreKey::BlockHash(hash) => self
                .blocks_by_hash
                .get(&parse_hash(hash)?)
                .map(|b| Self::block_view(&b, query.include_txs))
                .ok_or(StoreError::NotFound),
            StoreKey::Epoch(epoch) => {
                let epoch = epoch.as_number().ok_or(StoreError::NotFound)?;
                self.check_pruned(epoch)?;
                self.blocks_by_epoch
                    .get(&epoch)
                    .and_then(|blocks| {
                        blocks.last().map(|b| Self::block_view(b, query.include_txs))
                    })
                    .ok_or(StoreError::NotFound)
            }
            StoreKey::BlockNumber(number) => self
                .blocks_by_number
                .get(number)
                .map(|b| Self::block_view(&b, query.include_txs))
                .ok_or(StoreError::NotFound),
            StoreKey::TransactionHash(hash) => self
                .transactions
                .get(&parse_hash(hash)?)
                .map(|tx| tx.clone())
                .ok_or(StoreError::NotFound),
            StoreKey::Receipt(hash) => self
                .receipts
                .get(&parse_hash(hash)?)
                .map(|r| r.clone())
                .ok_or(StoreError::NotFound),
            StoreKey::BlocksByEpoch(epoch) => {
                let epoch = epoch.as_number().ok_or(StoreError::NotFound)?;
                self.check_pruned(epoch)?;
                self.blocks_by_epoch
                    .get(&epoch)
                    .map(|blocks| {
                        Value::Array(
                            blocks.iter().filter_map(|b| b.get("hash").cloned()).collect(),
                        )
                    })
                    .ok_or(StoreError::NotFound)
            }
            StoreKey::Logs(_) => self.logs(query),
        }
    }
}
