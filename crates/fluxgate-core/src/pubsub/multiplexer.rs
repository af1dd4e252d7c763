//! Shared upstream subscriptions with per-subscriber bounded queues.
//!
//! Each key moves through `Absent -> Active -> Absent`:
//!
//! - the first [`SubscriptionMultiplexer::attach`] opens the upstream and spawns its relay
//!   task; later attaches for the same key share it
//! - the relay task is the only reader of the upstream and fans every item out with
//!   `try_send`, so a slow subscriber loses items instead of stalling the others
//! - dropping the last [`DownstreamSubscription`] stops the relay, which unsubscribes once
//! - an upstream failure ends every attached subscription with `UpstreamDisconnected` and
//!   removes the key
//!
//! The key table lock is never held across an await.

use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify, OnceCell,
};
use tracing::{debug, info, warn};

use super::SubscriptionKind;
use crate::{
    config::SubscriptionConfig,
    metrics::MetricsCollector,
    node::{Node, UpstreamSubscription},
    proxy::errors::ProxyError,
};

/// Identity of a shareable upstream: node, kind and canonical params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub node: Arc<str>,
    pub kind: &'static str,
    pub params: String,
}

impl SubscriptionKey {
    #[must_use]
    pub fn new(node: &Node, kind: &SubscriptionKind) -> Self {
        Self { node: node.name_arc(), kind: kind.label(), params: kind.normalized_params() }
    }
}

struct Slot {
    key: SubscriptionKey,
    opened: OnceCell<Result<(), String>>,
    downstreams: Mutex<HashMap<u64, mpsc::Sender<Value>>>,
    /// Set before the senders are dropped when the upstream fails.
    failure: OnceLock<String>,
    stop: Notify,
}

impl Slot {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            opened: OnceCell::new(),
            downstreams: Mutex::new(HashMap::new()),
            failure: OnceLock::new(),
            stop: Notify::new(),
        }
    }

    fn fan_out(&self, value: &Value, metrics: Option<&MetricsCollector>) {
        let downstreams = self.downstreams.lock();
        for (id, tx) in downstreams.iter() {
            match tx.try_send(value.clone()) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(
                        node = %self.key.node,
                        kind = self.key.kind,
                        downstream = id,
                        "subscriber queue full, notification dropped"
                    );
                    if let Some(metrics) = metrics {
                        metrics.record_dropped_notification(self.key.kind);
                    }
                }
            }
        }
    }
}

struct Shared {
    table: Mutex<HashMap<SubscriptionKey, Arc<Slot>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Shared {
    /// Removes `slot` from the table if it is still the live entry for its key.
    fn remove_slot(&self, slot: &Arc<Slot>) -> bool {
        let mut table = self.table.lock();
        if table.get(&slot.key).is_some_and(|live| Arc::ptr_eq(live, slot)) {
            table.remove(&slot.key);
            true
        } else {
            false
        }
    }

    fn detach(&self, slot: &Arc<Slot>, id: u64) {
        let mut table = self.table.lock();
        let mut downstreams = slot.downstreams.lock();
        if downstreams.remove(&id).is_none() || !downstreams.is_empty() {
            return;
        }
        drop(downstreams);

        if table.get(&slot.key).is_some_and(|live| Arc::ptr_eq(live, slot)) {
            table.remove(&slot.key);
            drop(table);
            debug!(node = %slot.key.node, kind = slot.key.kind, "last subscriber detached");
            slot.stop.notify_one();
        }
    }
}

/// Deduplicates upstream subscriptions across callers.
pub struct SubscriptionMultiplexer {
    shared: Arc<Shared>,
    queue_capacity: usize,
    next_id: AtomicU64,
}

impl SubscriptionMultiplexer {
    #[must_use]
    pub fn new(queue_capacity: usize, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            shared: Arc::new(Shared { table: Mutex::new(HashMap::new()), metrics }),
            queue_capacity: queue_capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn from_config(
        config: &SubscriptionConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self::new(config.queue_capacity, metrics)
    }

    /// Attaches a subscriber for `kind` on `node`, opening the upstream if this is the first.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::DelegateSubscriptionFailed`] if the upstream cannot be opened.
    pub async fn attach(
        &self,
        node: &Arc<Node>,
        kind: SubscriptionKind,
    ) -> Result<DownstreamSubscription, ProxyError> {
        let key = SubscriptionKey::new(node, &kind);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let slot = {
            let mut table = self.shared.table.lock();
            let slot = Arc::clone(
                table.entry(key.clone()).or_insert_with(|| Arc::new(Slot::new(key))),
            );
            slot.downstreams.lock().insert(id, tx);
            slot
        };

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_downstream_subscription(slot.key.kind, true);
        }
        let downstream = DownstreamSubscription {
            id,
            slot: Arc::clone(&slot),
            shared: Arc::clone(&self.shared),
            rx,
            finished: false,
        };

        let opened = slot.opened.get_or_init(|| self.open(&slot, node, &kind)).await;
        if let Err(reason) = opened {
            self.shared.remove_slot(&slot);
            return Err(ProxyError::DelegateSubscriptionFailed(reason.clone()));
        }

        Ok(downstream)
    }

    async fn open(
        &self,
        slot: &Arc<Slot>,
        node: &Node,
        kind: &SubscriptionKind,
    ) -> Result<(), String> {
        match node.subscribe(kind).await {
            Ok(upstream) => {
                info!(
                    node = %node.name(),
                    kind = kind.label(),
                    upstream_id = %upstream.id(),
                    "upstream subscription opened"
                );
                if let Some(metrics) = &self.shared.metrics {
                    metrics.record_upstream_subscription(kind.label(), true);
                }
                tokio::spawn(relay(Arc::clone(&self.shared), Arc::clone(slot), upstream));
                Ok(())
            }
            Err(e) => {
                warn!(
                    node = %node.name(),
                    kind = kind.label(),
                    error = %e,
                    "failed to open upstream subscription"
                );
                if let Some(metrics) = &self.shared.metrics {
                    metrics.record_upstream_failure(kind.label());
                }
                Err(e.to_string())
            }
        }
    }

    /// Number of live upstream keys.
    #[must_use]
    pub fn active_upstreams(&self) -> usize {
        self.shared.table.lock().len()
    }

    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.shared.table.lock().contains_key(key)
    }

    /// Subscribers attached to `key`; zero when the key is absent.
    #[must_use]
    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.shared.table.lock().get(key).map_or(0, |slot| slot.downstreams.lock().len())
    }
}

async fn relay(shared: Arc<Shared>, slot: Arc<Slot>, mut upstream: Box<dyn UpstreamSubscription>) {
    let kind = slot.key.kind;

    let failure = loop {
        let item = tokio::select! {
            () = slot.stop.notified() => None,
            item = upstream.next() => Some(item),
        };

        match item {
            None => break None,
            Some(Some(Ok(value))) => slot.fan_out(&value, shared.metrics.as_deref()),
            Some(Some(Err(e))) => break Some(e.to_string()),
            Some(None) => break Some("upstream stream ended".to_string()),
        }
    };

    if let Some(metrics) = &shared.metrics {
        metrics.record_upstream_subscription(kind, false);
    }

    match failure {
        None => {
            if let Err(e) = upstream.unsubscribe().await {
                debug!(node = %slot.key.node, kind, error = %e, "upstream unsubscribe failed");
            }
            info!(node = %slot.key.node, kind, "upstream subscription closed");
        }
        Some(reason) => {
            warn!(node = %slot.key.node, kind, error = %reason, "upstream subscription failed");
            if let Some(metrics) = &shared.metrics {
                metrics.record_upstream_failure(kind);
            }
            let _ = slot.failure.set(reason);
            shared.remove_slot(&slot);
            slot.downstreams.lock().clear();
        }
    }
}

/// One subscriber's view of a shared upstream. Detaches on drop.
pub struct DownstreamSubscription {
    id: u64,
    slot: Arc<Slot>,
    shared: Arc<Shared>,
    rx: mpsc::Receiver<Value>,
    finished: bool,
}

impl std::fmt::Debug for DownstreamSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamSubscription")
            .field("id", &self.id)
            .field("key", &self.slot.key)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl DownstreamSubscription {
    #[must_use]
    pub fn key(&self) -> &SubscriptionKey {
        &self.slot.key
    }

    /// Next notification payload. After an upstream failure yields one
    /// [`ProxyError::UpstreamDisconnected`], then `None`.
    pub async fn recv(&mut self) -> Option<Result<Value, ProxyError>> {
        if self.finished {
            return None;
        }
        if let Some(value) = self.rx.recv().await {
            return Some(Ok(value));
        }
        self.finished = true;
        self.slot.failure.get().map(|reason| Err(ProxyError::UpstreamDisconnected(reason.clone())))
    }
}

impl Drop for DownstreamSubscription {
    fn drop(&mut self) {
        self.shared.detach(&self.slot, self.id);
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_downstream_subscription(self.slot.key.kind, false);
        }
    }
}
