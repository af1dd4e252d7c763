//! Store-or-delegate dispatch.
//!
//! Every cacheable read makes one decision:
//!
//! ```text
//!   classify_key ──Malformed──────────────────────────────► node (verbatim, no stats)
//!        ├───────Unstable───────────────────────────────────► node (no stats)
//!        │
//!    WellFormed
//!        │
//!   store.get ──Ok──────────────────────────────────────────► store value   (hit)
//!        ├───Pruned────────────────────────────────────────► DataTooOld    (miss)
//!        ├───NotFound──────────────────────────────────────► node          (miss)
//!        └───Unavailable──────── warn + unavailable metric ► node          (miss)
//! ```

use dashmap::DashMap;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, warn};

use super::errors::ProxyError;
use crate::{
    metrics::MetricsCollector,
    node::Node,
    store::{Store, StoreError, StoreKey, StoreQuery},
    types::is_canonical_hash,
};

/// Whether a lookup key can be used against the store at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    WellFormed,
    /// A hash that is not `0x` + 64 hex digits; the node reports its own error for it.
    Malformed,
    /// A log filter whose range still depends on the chain head (tags or open bounds).
    Unstable,
}

#[must_use]
pub fn classify_key(query: &StoreQuery) -> KeyClass {
    match &query.key {
        StoreKey::BlockHash(hash) | StoreKey::TransactionHash(hash) | StoreKey::Receipt(hash)
            if !is_canonical_hash(hash) =>
        {
            KeyClass::Malformed
        }
        StoreKey::Logs(filter) if !filter.has_fixed_bounds() => KeyClass::Unstable,
        _ => KeyClass::WellFormed,
    }
}

/// Where a dispatched value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Store,
    Node,
}

#[derive(Debug)]
pub struct Dispatched {
    pub value: Value,
    pub source: Source,
}

#[derive(Debug, Default)]
struct HitCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Per-method store hit/miss counters.
#[derive(Debug, Default)]
pub struct HitStats {
    counters: DashMap<String, Arc<HitCounter>>,
}

impl HitStats {
    /// Statistic key for `method`.
    #[must_use]
    pub fn key(method: &str) -> String {
        format!("rpc/call/{method}/store/hitratio")
    }

    /// Records one lookup and returns the updated `(hits, misses)`.
    pub fn record(&self, method: &str, hit: bool) -> (u64, u64) {
        let key = Self::key(method);
        let counter = self.counters.get(&key).map(|c| Arc::clone(&c));
        let counter =
            counter.unwrap_or_else(|| Arc::clone(self.counters.entry(key).or_default().value()));

        if hit {
            let hits = counter.hits.fetch_add(1, Ordering::Relaxed) + 1;
            (hits, counter.misses.load(Ordering::Relaxed))
        } else {
            let misses = counter.misses.fetch_add(1, Ordering::Relaxed) + 1;
            (counter.hits.load(Ordering::Relaxed), misses)
        }
    }

    /// `(hits, misses)` for `method`, if it was ever looked up.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<(u64, u64)> {
        self.counters.get(&Self::key(method)).map(|c| {
            (c.hits.load(Ordering::Relaxed), c.misses.load(Ordering::Relaxed))
        })
    }

    /// Hit ratio for `method`; `None` before the first lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self, method: &str) -> Option<f64> {
        let (hits, misses) = self.get(method)?;
        let total = hits + misses;
        (total > 0).then(|| hits as f64 / total as f64)
    }
}

/// Answers reads from the store when it can and from the bound node otherwise.
pub struct RequestDispatcher {
    store: Option<Arc<dyn Store>>,
    stats: HitStats,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(store: Option<Arc<dyn Store>>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { store, stats: HitStats::default(), metrics }
    }

    #[must_use]
    pub fn stats(&self) -> &HitStats {
        &self.stats
    }

    #[must_use]
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Runs the store-or-delegate decision for `query`. `params` are forwarded to `node`
    /// unchanged when the store cannot answer.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::DataTooOld`] when the store reports the data as pruned
    /// - [`ProxyError::Node`] when delegation fails
    pub async fn dispatch(
        &self,
        query: &StoreQuery,
        node: &Node,
        params: Value,
    ) -> Result<Dispatched, ProxyError> {
        let method = query.method;

        let Some(store) = &self.store else {
            return Self::delegate(node, method, params).await;
        };

        match classify_key(query) {
            KeyClass::WellFormed => {}
            KeyClass::Malformed => {
                debug!(method, "malformed key, delegating without store lookup");
                return Self::delegate(node, method, params).await;
            }
            KeyClass::Unstable => {
                debug!(method, "unpinned log range, delegating without store lookup");
                return Self::delegate(node, method, params).await;
            }
        }

        match store.get(query).await {
            Ok(value) => {
                self.record(method, true);
                debug!(method, "store hit");
                Ok(Dispatched { value, source: Source::Store })
            }
            Err(StoreError::Pruned) => {
                self.record(method, false);
                debug!(method, "store data pruned, not delegating");
                Err(ProxyError::DataTooOld)
            }
            Err(StoreError::NotFound) => {
                self.record(method, false);
                debug!(method, node = %node.name(), "store miss, delegating to node");
                Self::delegate(node, method, params).await
            }
            Err(StoreError::Unavailable(reason)) => {
                self.record(method, false);
                if let Some(metrics) = &self.metrics {
                    metrics.record_store_unavailable(method);
                }
                warn!(
                    method,
                    error = %reason,
                    node = %node.name(),
                    "store unavailable, delegating to node"
                );
                Self::delegate(node, method, params).await
            }
        }
    }

    async fn delegate(node: &Node, method: &str, params: Value) -> Result<Dispatched, ProxyError> {
        let value = node.call(method, params).await?;
        Ok(Dispatched { value, source: Source::Node })
    }

    fn record(&self, method: &str, hit: bool) {
        let (hits, misses) = self.stats.record(method, hit);
        if let Some(metrics) = &self.metrics {
            metrics.record_store_lookup(method, hit, hits, misses);
        }
    }
}
