use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fluxgate_core::{
    middleware::RequestContext,
    provider::{GroupKey, GroupSnapshot},
    proxy::{
        errors::{INTERNAL_ERROR, INVALID_REQUEST},
        Gateway,
    },
    types::{JsonRpcRequest, JsonRpcResponse},
};
use serde::Serialize;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    middleware::{client_ip, CorrelationId},
    AppState,
};

pub const PARSE_ERROR: i32 = -32700;

/// Answer to one HTTP body or WebSocket frame.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
}

impl RpcReply {
    fn error(code: i32, message: String) -> Self {
        Self::Single(JsonRpcResponse::error(code, message, Arc::new(Value::Null)))
    }

    /// Every `result` that is a JSON string, in response order.
    pub fn string_results(&self) -> impl Iterator<Item = &str> {
        let responses = match self {
            Self::Single(response) => std::slice::from_ref(response),
            Self::Batch(responses) => responses.as_slice(),
        };
        responses.iter().filter_map(|r| r.result.as_ref().and_then(Value::as_str))
    }

    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Single(r) if r.error.as_ref().is_some_and(|e| e.code == PARSE_ERROR))
    }
}

/// Decodes one request object. Objects that are not valid requests are answered with
/// `-32600`, echoing their id when it can be read.
fn decode(item: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let id = item.get("id").cloned().unwrap_or(Value::Null);
    serde_json::from_value(item).map_err(|e| {
        JsonRpcResponse::error(INVALID_REQUEST, format!("invalid request: {e}"), Arc::new(id))
    })
}

/// Parses `body` as a single call or a batch and runs it through the gateway.
///
/// Batch entries that fail to decode are answered in place; the rest run as one batch.
pub async fn answer(gateway: &Gateway, ctx: RequestContext, body: &[u8]) -> RpcReply {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => return RpcReply::error(PARSE_ERROR, format!("parse error: {e}")),
    };

    match payload {
        Value::Array(items) if items.is_empty() => {
            RpcReply::error(INVALID_REQUEST, "invalid request: empty batch".into())
        }
        Value::Array(items) => {
            let decoded: Vec<_> = items.into_iter().map(decode).collect();
            let valid: Vec<JsonRpcRequest> =
                decoded.iter().filter_map(|d| d.as_ref().ok().cloned()).collect();

            let mut answered = if valid.is_empty() {
                Vec::new().into_iter()
            } else {
                gateway.handle_batch(&ctx, &valid).await.into_iter()
            };

            let responses = decoded
                .into_iter()
                .filter_map(|d| match d {
                    Ok(_) => answered.next(),
                    Err(rejected) => Some(rejected),
                })
                .collect();
            RpcReply::Batch(responses)
        }
        single => match decode(single) {
            Ok(request) => RpcReply::Single(gateway.handle(ctx, &request).await),
            Err(rejected) => RpcReply::Single(rejected),
        },
    }
}

/// [`answer`] bounded by `timeout`.
pub async fn answer_within(
    gateway: &Gateway,
    ctx: RequestContext,
    body: &[u8],
    timeout: Duration,
) -> RpcReply {
    let correlation_id = Arc::clone(&ctx.correlation_id);
    match tokio::time::timeout(timeout, answer(gateway, ctx, body)).await {
        Ok(reply) => reply,
        Err(_) => {
            warn!(
                correlation_id = %correlation_id,
                timeout_ms = timeout.as_millis(),
                "request timed out"
            );
            RpcReply::error(INTERNAL_ERROR, "request timed out".into())
        }
    }
}

/// Handles JSON-RPC over HTTP, single or batched.
///
/// Subscription calls are answered with "subscriptions unsupported": they need the
/// per-connection notifier of `/ws`.
pub async fn handle_rpc(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = client_ip(&headers, peer);
    let correlation_id = CorrelationId::from_headers(&headers);
    debug!(caller = %caller, correlation_id = %correlation_id, bytes = body.len(), "rpc call");

    let ctx = RequestContext::new(caller, correlation_id.0);
    let reply = answer_within(&state.gateway, ctx, &body, state.request_timeout).await;

    let status = if reply.is_parse_error() { StatusCode::BAD_REQUEST } else { StatusCode::OK };
    (status, Json(reply)).into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub groups: Vec<GroupSnapshot>,
}

/// Node and group health. `503` when the default group has no available node.
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let provider = state.routing.provider();
    let healthy = provider.has_available(GroupKey::Default);

    let report = HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" },
        groups: provider.snapshot(),
    };
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(report))
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.get_prometheus_metrics(),
    )
}
