//! Read-only access to the historical chain store.
//!
//! The gateway never writes to the store and does not care how it persists data; it only
//! needs a keyed lookup that distinguishes "not here" from "deliberately gone" (pruned) and
//! from "store is down".

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{filter::LogFilter, types::Epoch};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store has no record for the key.
    #[error("not found in store")]
    NotFound,

    /// The data existed but has been pruned from the store.
    #[error("data already pruned")]
    Pruned,

    /// The store could not be queried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Typed lookup key. Hashes are kept as sent so malformed ones can be told apart before
/// the store is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreKey {
    BlockHash(String),
    Epoch(Epoch),
    BlockNumber(u64),
    TransactionHash(String),
    Receipt(String),
    BlocksByEpoch(Epoch),
    Logs(LogFilter),
}

/// One store lookup: the RPC method it serves plus its key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub method: &'static str,
    pub key: StoreKey,
    /// Whether full transactions were requested (block lookups only).
    pub include_txs: bool,
}

impl StoreQuery {
    #[must_use]
    pub fn new(method: &'static str, key: StoreKey) -> Self {
        Self { method, key, include_txs: false }
    }

    #[must_use]
    pub fn with_txs(mut self, include_txs: bool) -> Self {
        self.include_txs = include_txs;
        self
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// # Errors
    ///
    /// [`StoreError::NotFound`] on a plain miss, [`StoreError::Pruned`] when the data is too
    /// old to be kept, [`StoreError::Unavailable`] on any backend failure.
    async fn get(&self, query: &StoreQuery) -> Result<Value, StoreError>;
}
