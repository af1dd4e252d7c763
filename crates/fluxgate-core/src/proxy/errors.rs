use std::sync::Arc;

use serde_json::Value;

use super::validation::ValidationError;
use crate::{
    filter::FilterError,
    node::NodeError,
    types::{JsonRpcError, JsonRpcResponse},
};

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const LIMIT_EXCEEDED: i32 = -32005;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The selected group has no node that may take traffic.
    #[error("no healthy client available in group {group}")]
    NoHealthyClient { group: &'static str },

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The store pruned the requested range; the node is not asked in its place.
    #[error("failed to get stale epoch logs (data too old)")]
    DataTooOld,

    #[error("notifications not supported")]
    SubscriptionsUnsupported,

    #[error("failed to delegate subscription: {0}")]
    DelegateSubscriptionFailed(String),

    #[error("upstream subscription disconnected: {0}")]
    UpstreamDisconnected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("the method {0} does not exist/is not available")]
    MethodNotSupported(String),

    #[error("rate limit exceeded")]
    RateLimited,

    /// Keeps the node's own error so JSON-RPC errors reach the caller unchanged.
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ProxyError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MethodNotAllowed(method) => Self::MethodNotSupported(method),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl ProxyError {
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Filter(_) | Self::InvalidParams(_) => INVALID_PARAMS,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotSupported(_) | Self::SubscriptionsUnsupported => METHOD_NOT_FOUND,
            Self::RateLimited => LIMIT_EXCEEDED,
            Self::Node(NodeError::RpcError(e)) => e.code,
            Self::NoHealthyClient { .. } |
            Self::DataTooOld |
            Self::DelegateSubscriptionFailed(_) |
            Self::UpstreamDisconnected(_) |
            Self::Node(_) |
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// JSON-RPC error object for this failure. Node errors are passed through whole.
    #[must_use]
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Node(NodeError::RpcError(e)) => e.clone(),
            other => JsonRpcError { code: other.code(), message: other.to_string(), data: None },
        }
    }

    #[must_use]
    pub fn to_response(&self, id: Arc<Value>) -> JsonRpcResponse {
        JsonRpcResponse::from_error(self.to_json_rpc_error(), id)
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::NoHealthyClient { .. } => "no_healthy_client",
            Self::Filter(_) => "invalid_filter",
            Self::InvalidParams(_) => "invalid_params",
            Self::DataTooOld => "data_too_old",
            Self::SubscriptionsUnsupported => "subscriptions_unsupported",
            Self::DelegateSubscriptionFailed(_) => "delegate_subscription_failed",
            Self::UpstreamDisconnected(_) => "upstream_disconnected",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotSupported(_) => "method_not_supported",
            Self::RateLimited => "rate_limited",
            Self::Node(e) => e.as_metric_str(),
            Self::Internal(_) => "internal",
        }
    }
}
