//! Raw transaction relay.
//!
//! Transactions accepted by the serving node are copied to a set of relay nodes in the
//! background. Submission never blocks the caller: a full queue is reported back as
//! [`RelayOutcome::Full`] and the transaction is not relayed.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, mpsc::error::TrySendError};
use tracing::{debug, info, warn};

use crate::{
    config::{BackendKind, NodeEndpoint, RelayConfig},
    metrics::MetricsCollector,
    node::{NodeClient, NodeError, RpcClient},
};

/// Result of handing a raw transaction to the relay queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted,
    Full,
}

/// Queue of raw transactions to broadcast.
pub trait RelayPool: Send + Sync {
    fn submit(&self, raw_tx: String) -> RelayOutcome;
}

struct RelayTarget {
    name: String,
    client: Arc<dyn NodeClient>,
}

/// Bounded queue with a single broadcasting worker.
pub struct TxRelayer {
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    targets: Arc<[RelayTarget]>,
    method: &'static str,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TxRelayer {
    #[must_use]
    pub fn new(
        targets: Vec<(String, Arc<dyn NodeClient>)>,
        buffer_size: usize,
        backend: BackendKind,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let targets =
            targets.into_iter().map(|(name, client)| RelayTarget { name, client }).collect();
        let method = match backend {
            BackendKind::Cfx => "cfx_sendRawTransaction",
            BackendKind::Eth => "eth_sendRawTransaction",
        };

        Self { tx, rx: Mutex::new(Some(rx)), targets, method, metrics }
    }

    /// Builds HTTP clients for every configured relay node.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP transport cannot be built.
    pub fn from_config(
        config: &RelayConfig,
        backend: BackendKind,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, NodeError> {
        let mut targets: Vec<(String, Arc<dyn NodeClient>)> =
            Vec::with_capacity(config.nodes.len());
        for url in &config.nodes {
            let endpoint = NodeEndpoint {
                name: url.clone(),
                url: url.clone(),
                ws_url: None,
                timeout_seconds: 10,
            };
            targets.push((url.clone(), Arc::new(RpcClient::new(&endpoint, backend)?)));
        }
        Ok(Self::new(targets, config.buffer_size, backend, metrics))
    }

    /// Spawns the broadcasting worker. Returns `None` if it was already started.
    ///
    /// Queued transactions still waiting when `shutdown_rx` fires are dropped.
    #[must_use]
    pub fn start_with_shutdown(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;
        let targets = Arc::clone(&self.targets);
        let method = self.method;
        let metrics = self.metrics.clone();

        Some(tokio::spawn(async move {
            info!(targets = targets.len(), "transaction relay started");
            loop {
                tokio::select! {
                    raw = rx.recv() => {
                        let Some(raw) = raw else { break };
                        broadcast_tx(&targets, method, raw, metrics.as_deref()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("transaction relay stopped");
                        break;
                    }
                }
            }
        }))
    }
}

async fn broadcast_tx(
    targets: &[RelayTarget],
    method: &'static str,
    raw: String,
    metrics: Option<&MetricsCollector>,
) {
    let params = Value::Array(vec![Value::String(raw)]);
    let deliveries = targets.iter().map(|target| {
        let params = params.clone();
        async move { (target, target.client.call(method, params).await) }
    });

    for (target, result) in join_all(deliveries).await {
        match &result {
            Ok(_) => debug!(node = %target.name, "transaction relayed"),
            Err(e) => debug!(node = %target.name, error = %e, "transaction relay failed"),
        }
        if let Some(metrics) = metrics {
            metrics.record_relay_delivery(&target.name, result.is_ok());
        }
    }
}

impl RelayPool for TxRelayer {
    fn submit(&self, raw_tx: String) -> RelayOutcome {
        let outcome = match self.tx.try_send(raw_tx) {
            Ok(()) => RelayOutcome::Accepted,
            Err(TrySendError::Full(_)) => RelayOutcome::Full,
            Err(TrySendError::Closed(_)) => {
                warn!("transaction relay worker is gone");
                RelayOutcome::Full
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_relay_submission(outcome == RelayOutcome::Accepted);
        }
        outcome
    }
}
