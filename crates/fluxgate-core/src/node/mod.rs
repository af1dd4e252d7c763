//! Full-node handles and their health.
//!
//! A [`Node`] owns one connection ([`NodeClient`]), the [`StatusCell`] its monitor publishes
//! into, and the cancellation signal for that monitor. Everything on the serving path reads
//! the status lock-free; only the monitor task (and [`Node::close`]) writes it.

pub mod client;
pub mod errors;
pub mod http_client;
pub mod monitor;
pub mod status;
pub mod websocket;

pub use client::{NodeClient, RpcClient, UpstreamSubscription};
pub use errors::NodeError;
pub use monitor::HealthMonitor;
pub use status::{HealthState, Status, StatusCell};

use crate::{metrics::MetricsCollector, pubsub::SubscriptionKind, types::Epoch};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{sync::broadcast, task::JoinHandle};

/// One backend full node.
pub struct Node {
    name: Arc<str>,
    client: Arc<dyn NodeClient>,
    status: Arc<StatusCell>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Creates a node without a probe task. Its status stays `Unknown` until something
    /// publishes into [`Node::status_cell`].
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, client: Arc<dyn NodeClient>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            name: name.into(),
            client,
            status: Arc::new(StatusCell::default()),
            shutdown_tx,
            closed: AtomicBool::new(false),
            monitor: Mutex::new(None),
        })
    }

    /// Creates a node and starts its health monitor. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn with_monitor(
        name: impl Into<Arc<str>>,
        client: Arc<dyn NodeClient>,
        monitor: &HealthMonitor,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Arc<Self> {
        let node = Self::new(name, client);
        let handle = monitor.start_with_shutdown(
            Arc::clone(&node.name),
            Arc::clone(&node.client),
            Arc::clone(&node.status),
            metrics,
            node.shutdown_tx.subscribe(),
        );
        *node.monitor.lock() = Some(handle);
        node
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.client.url()
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.client
    }

    /// Current health snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Arc<Status> {
        self.status.load()
    }

    /// The cell the monitor publishes into.
    #[must_use]
    pub fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.status().is_available()
    }

    /// Forwards a JSON-RPC call to the node.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Closed`] after [`Node::close`], otherwise whatever the client
    /// returns.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        self.client.call(method, params).await
    }

    /// Opens an upstream subscription on this node.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Closed`] after [`Node::close`], otherwise whatever the client
    /// returns.
    pub async fn subscribe(
        &self,
        kind: &SubscriptionKind,
    ) -> Result<Box<dyn UpstreamSubscription>, NodeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        self.client.subscribe(kind).await
    }

    /// Stops the probe task and publishes a terminal `Closed` status. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        self.status.update(Status::closed);
        tracing::info!(node = %self.name, "node closed");
    }

    /// Waits for the probe task to exit after [`Node::close`].
    pub async fn join_monitor(&self) {
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("url", &self.client.url())
            .field("state", &self.status().state)
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Turns epoch tags into concrete numbers against some node's view of the chain.
#[async_trait]
pub trait EpochResolver: Send + Sync {
    /// Returns `None` when the tag cannot be resolved right now.
    async fn resolve(&self, epoch: &Epoch) -> Option<u64>;
}

/// Resolves Conflux epoch tags with `cfx_epochNumber` on one node. Ethereum backends have
/// no epochs, so there is no counterpart for them; obtain one with [`Node::cfx_epochs`].
#[derive(Debug, Clone, Copy)]
pub struct CfxEpochResolver<'a> {
    node: &'a Node,
}

impl Node {
    /// Epoch-tag resolver for a Conflux node.
    #[must_use]
    pub fn cfx_epochs(&self) -> CfxEpochResolver<'_> {
        CfxEpochResolver { node: self }
    }
}

#[async_trait]
impl EpochResolver for CfxEpochResolver<'_> {
    async fn resolve(&self, epoch: &Epoch) -> Option<u64> {
        match epoch {
            Epoch::Number(n) => Some(*n),
            Epoch::Tag(crate::types::EpochTag::Earliest) => Some(0),
            Epoch::Tag(tag) => {
                match self.node.call("cfx_epochNumber", serde_json::json!([tag.as_str()])).await {
                    Ok(value) => value.as_str().and_then(crate::types::parse_quantity),
                    Err(e) => {
                        tracing::debug!(
                            node = %self.node.name,
                            epoch = %epoch,
                            error = %e,
                            "failed to resolve epoch tag"
                        );
                        None
                    }
                }
            }
        }
    }
}
