use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{SubscriptionKind, SubscriptionMultiplexer};
use crate::{
    config::BackendKind, node::Node, proxy::errors::ProxyError, types::JsonRpcNotification,
};

/// Subscription state of one WebSocket connection.
///
/// Every subscription gets a forwarder task that turns multiplexer items into
/// notification frames on the connection's outbound channel. Forwarders are held back
/// until [`Notifier::release`] (or [`Notifier::release_pending`]) so the subscribe response
/// is written before the first notification. A forwarder whose upstream ended removes its own entry.
pub struct Notifier {
    backend: BackendKind,
    multiplexer: Arc<SubscriptionMultiplexer>,
    outbound: mpsc::Sender<String>,
    forwarders: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl Notifier {
    #[must_use]
    pub fn new(
        backend: BackendKind,
        multiplexer: Arc<SubscriptionMultiplexer>,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        Self {
            backend,
            multiplexer,
            outbound,
            forwarders: Arc::new(Mutex::new(HashMap::new())),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches to the shared upstream for `kind` and returns the new subscription id.
    ///
    /// # Errors
    ///
    /// Propagates the multiplexer's open failure.
    pub async fn subscribe(
        &self,
        node: &Arc<Node>,
        kind: SubscriptionKind,
    ) -> Result<String, ProxyError> {
        let mut downstream = self.multiplexer.attach(node, kind).await?;
        let id = format!("0x{}", uuid::Uuid::new_v4().simple());

        let (gate_tx, gate_rx) = oneshot::channel();
        let outbound = self.outbound.clone();
        let method = self.backend.notification_method();
        let sub_id = id.clone();
        let registry = Arc::clone(&self.forwarders);

        let forwarder = tokio::spawn(async move {
            // A dropped gate means the response was never queued; nothing to forward to.
            if gate_rx.await.is_err() {
                return;
            }

            while let Some(item) = downstream.recv().await {
                let notification = match item {
                    Ok(result) => JsonRpcNotification::result(method, &sub_id, result),
                    Err(e) => JsonRpcNotification::error(method, &sub_id, e.to_json_rpc_error()),
                };
                let frame = match serde_json::to_string(&notification) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(subscription = %sub_id, error = %e, "failed to encode notification");
                        continue;
                    }
                };
                if outbound.send(frame).await.is_err() {
                    break;
                }
            }
            registry.lock().remove(&sub_id);
            debug!(subscription = %sub_id, "forwarder finished");
        });

        // Inserted before the gate is queued, so the forwarder cannot finish first.
        self.forwarders.lock().insert(id.clone(), forwarder);
        self.pending.lock().insert(id.clone(), gate_tx);
        Ok(id)
    }

    /// Lets the forwarder of `id` start sending. Returns `false` when `id` was not held
    /// back, which includes every value that is not a subscription id of this connection.
    pub fn release(&self, id: &str) -> bool {
        match self.pending.lock().remove(id) {
            Some(gate) => {
                let _ = gate.send(());
                true
            }
            None => false,
        }
    }

    /// Lets every held-back forwarder start sending.
    pub fn release_pending(&self) {
        for (_, gate) in self.pending.lock().drain() {
            let _ = gate.send(());
        }
    }

    /// Stops forwarding for `id`. Returns `false` for an unknown id.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.pending.lock().remove(id);
        match self.forwarders.lock().remove(id) {
            Some(forwarder) => {
                forwarder.abort();
                true
            }
            None => false,
        }
    }

    /// Subscriptions on this connection that are still forwarding or waiting for release.
    #[must_use]
    pub fn active(&self) -> usize {
        self.forwarders.lock().len()
    }

    /// Drops every subscription of the connection.
    pub fn close(&self) {
        self.pending.lock().clear();
        for (_, forwarder) in self.forwarders.lock().drain() {
            forwarder.abort();
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.close();
    }
}
