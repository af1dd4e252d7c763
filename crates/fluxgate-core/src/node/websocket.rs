use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use super::{client::UpstreamSubscription, errors::NodeError};
use crate::{config::BackendKind, pubsub::SubscriptionKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;

/// One upstream subscription on its own WebSocket connection.
///
/// A dedicated connection per upstream key keeps teardown simple: unsubscribing closes the
/// socket, and a socket failure fails exactly one subscription.
pub struct WsSubscription {
    node: String,
    id: String,
    backend: BackendKind,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl WsSubscription {
    /// Connects, sends the subscribe request and waits for the node to confirm an id.
    ///
    /// # Errors
    ///
    /// - [`NodeError::ConnectionFailed`] if the socket cannot be opened or written
    /// - [`NodeError::RpcError`] if the node rejects the subscription
    /// - [`NodeError::Timeout`] if no confirmation arrives within `timeout`
    pub async fn open(
        node: &str,
        ws_url: &str,
        backend: BackendKind,
        kind: &SubscriptionKind,
        timeout: Duration,
    ) -> Result<Self, NodeError> {
        let (stream, _) = tokio::time::timeout(timeout, connect_async(ws_url))
            .await
            .map_err(|_| NodeError::Timeout)?
            .map_err(|e| NodeError::ConnectionFailed(format!("websocket connection failed: {e}")))?;

        let (mut write, mut read) = stream.split();

        let subscribe_msg = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_REQUEST_ID,
            "method": backend.subscribe_method(),
            "params": kind.upstream_params(),
        });

        tracing::debug!(node = %node, message = %subscribe_msg, "sending subscription message");

        write
            .send(Message::Text(subscribe_msg.to_string().into()))
            .await
            .map_err(|e| NodeError::ConnectionFailed(format!("websocket send error: {e}")))?;

        let id = tokio::time::timeout(timeout, wait_for_confirmation(&mut read))
            .await
            .map_err(|_| NodeError::Timeout)??;

        tracing::info!(node = %node, subscription_id = %id, kind = kind.label(), "upstream subscription confirmed");

        Ok(Self { node: node.to_string(), id, backend, write, read })
    }
}

async fn wait_for_confirmation(read: &mut SplitStream<WsStream>) -> Result<String, NodeError> {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(NodeError::SubscriptionClosed(e.to_string())),
        };

        let Ok(json) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if json.get("id").and_then(Value::as_u64) != Some(SUBSCRIBE_REQUEST_ID) {
            continue;
        }
        if let Some(error) = json.get("error") {
            let error = serde_json::from_value(error.clone())
                .map_err(|e| NodeError::InvalidResponse(e.to_string()))?;
            return Err(NodeError::RpcError(error));
        }
        return json
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidResponse("missing subscription id".to_string()));
    }

    Err(NodeError::SubscriptionClosed("connection closed before confirmation".to_string()))
}

#[async_trait]
impl UpstreamSubscription for WsSubscription {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next(&mut self) -> Option<Result<Value, NodeError>> {
        let notification_method = self.backend.notification_method();

        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let Ok(mut json) = serde_json::from_str::<Value>(&text) else {
                        tracing::warn!(node = %self.node, "failed to parse websocket message");
                        continue;
                    };
                    if json.get("method").and_then(Value::as_str) != Some(notification_method) {
                        continue;
                    }
                    let params = json.get_mut("params");
                    let matches_id = params
                        .as_ref()
                        .and_then(|p| p.get("subscription"))
                        .and_then(Value::as_str) ==
                        Some(self.id.as_str());
                    if !matches_id {
                        continue;
                    }
                    if let Some(result) = params.and_then(|p| p.get_mut("result")) {
                        return Some(Ok(result.take()));
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::warn!(node = %self.node, "websocket connection closed");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(node = %self.node, error = %e, "websocket error");
                    return Some(Err(NodeError::SubscriptionClosed(e.to_string())));
                }
            }
        }

        None
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), NodeError> {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": UNSUBSCRIBE_REQUEST_ID,
            "method": self.backend.unsubscribe_method(),
            "params": [self.id],
        });

        let sent = self
            .write
            .send(Message::Text(msg.to_string().into()))
            .await
            .map_err(|e| NodeError::ConnectionFailed(format!("websocket send error: {e}")));

        let _ = self.write.close().await;
        tracing::debug!(node = %self.node, subscription_id = %self.id, "upstream subscription closed");
        sent
    }
}
