use crate::types::JsonRpcError;
use thiserror::Error;

/// Errors that can occur when talking to a full node.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NodeError {
    /// Request exceeded the configured timeout duration.
    #[error("request timeout")]
    Timeout,

    /// Failed to establish a connection to the node.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    #[error("http error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error returned by the node itself.
    ///
    /// Kept whole so callers see the node's exact code, message and data.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    RpcError(JsonRpcError),

    /// Network-level error from the underlying HTTP client.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response from the node could not be parsed or was malformed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Too many in-flight requests against this node.
    #[error("concurrency limit reached: {0}")]
    ConcurrencyLimit(String),

    /// The node's client has no streaming transport.
    #[error("subscriptions unsupported by node")]
    SubscriptionsUnsupported,

    /// The streaming transport dropped or refused the subscription.
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),

    /// The node has been closed and no longer accepts requests.
    #[error("node closed")]
    Closed,
}

impl NodeError {
    /// Returns `true` for failures that say nothing about the node's health.
    ///
    /// A JSON-RPC error means the node answered; everything else means it did not.
    #[must_use]
    pub fn is_node_answer(&self) -> bool {
        matches!(self, Self::RpcError(_))
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_) => "rpc_error",
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::SubscriptionsUnsupported => "subscriptions_unsupported",
            Self::SubscriptionClosed(_) => "subscription_closed",
            Self::Closed => "closed",
        }
    }
}
