use async_trait::async_trait;
use serde_json::Value;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::{
    errors::NodeError,
    http_client::HttpClient,
    websocket::WsSubscription,
};
use crate::{
    config::{BackendKind, NodeEndpoint},
    pubsub::SubscriptionKind,
    types::{JsonRpcRequest, JsonRpcResponse},
};

/// Connection handle to one full node.
///
/// The gateway only needs two capabilities: a JSON-RPC call and, for streaming-capable
/// transports, a live subscription.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Address shown in logs and health output.
    fn url(&self) -> &str;

    /// Issues a single JSON-RPC call and returns the `result` member.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::RpcError`] with the node's own error object when the node
    /// answers with an error, or a transport error otherwise.
    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError>;

    /// Opens an upstream subscription.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SubscriptionsUnsupported`] unless the client has a streaming
    /// transport.
    async fn subscribe(
        &self,
        _kind: &SubscriptionKind,
    ) -> Result<Box<dyn UpstreamSubscription>, NodeError> {
        Err(NodeError::SubscriptionsUnsupported)
    }
}

/// A live upstream event stream held against one node.
#[async_trait]
pub trait UpstreamSubscription: Send {
    /// Subscription id assigned by the node.
    fn id(&self) -> &str;

    /// Next notification payload. `None` or an error means the stream is gone.
    async fn next(&mut self) -> Option<Result<Value, NodeError>>;

    /// Tears the stream down on the node side.
    ///
    /// # Errors
    ///
    /// Returns an error if the unsubscribe message could not be delivered.
    async fn unsubscribe(self: Box<Self>) -> Result<(), NodeError>;
}

/// JSON-RPC client for a configured node: calls over HTTP, subscriptions over WebSocket.
pub struct RpcClient {
    name: String,
    url: String,
    ws_url: Option<String>,
    backend: BackendKind,
    timeout: Duration,
    http: HttpClient,
    next_id: AtomicU64,
}

impl RpcClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP transport cannot be built.
    pub fn new(endpoint: &NodeEndpoint, backend: BackendKind) -> Result<Self, NodeError> {
        Ok(Self {
            name: endpoint.name.clone(),
            url: endpoint.url.clone(),
            ws_url: endpoint.ws_url.clone(),
            backend,
            timeout: endpoint.timeout(),
            http: HttpClient::new()?,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl NodeClient for RpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, Some(params), Value::from(id));

        let body = serde_json::to_vec(&request)
            .map_err(|e| NodeError::InvalidResponse(format!("failed to serialize request: {e}")))?;

        tracing::trace!(node = %self.name, method = %method, "sending request to node");

        let bytes =
            self.http.send_request(&self.url, bytes::Bytes::from(body), self.timeout).await?;
        parse_response(&bytes)
    }

    async fn subscribe(
        &self,
        kind: &SubscriptionKind,
    ) -> Result<Box<dyn UpstreamSubscription>, NodeError> {
        let ws_url = self.ws_url.as_deref().ok_or(NodeError::SubscriptionsUnsupported)?;
        let subscription =
            WsSubscription::open(&self.name, ws_url, self.backend, kind, self.timeout).await?;
        Ok(Box::new(subscription))
    }
}

/// Extracts the `result` of a JSON-RPC response body, mapping node errors to
/// [`NodeError::RpcError`].
///
/// # Errors
///
/// Returns [`NodeError::InvalidResponse`] when the body is not a JSON-RPC response.
pub fn parse_response(bytes: &[u8]) -> Result<Value, NodeError> {
    let response: JsonRpcResponse = serde_json::from_slice(bytes)
        .map_err(|e| NodeError::InvalidResponse(format!("invalid json: {e}")))?;

    if let Some(error) = response.error {
        return Err(NodeError::RpcError(error));
    }

    Ok(response.result.unwrap_or(Value::Null))
}
