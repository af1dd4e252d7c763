//! JSON-RPC over WebSocket.
//!
//! Each connection owns a [`Notifier`] and one writer task draining its outbound channel.
//! Frames are answered concurrently, at most `ws_max_in_flight` at a time, so responses may
//! arrive out of order and are matched by id. Responses and notifications share the
//! channel; a subscription's forwarder is released only after the response carrying its id
//! has been queued, so the response always precedes the first notification.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::Response,
};
use fluxgate_core::{middleware::RequestContext, pubsub::Notifier};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::{
    middleware::{client_ip, CorrelationId},
    router::answer_within,
    AppState,
};

pub async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let caller = client_ip(&headers, peer);
    let correlation_id = CorrelationId::from_headers(&headers);
    ws.on_upgrade(move |socket| serve_connection(socket, state, caller, correlation_id))
}

/// Per-connection pieces every frame task needs.
#[derive(Clone)]
struct Connection {
    state: AppState,
    notifier: Arc<Notifier>,
    outbound: mpsc::Sender<String>,
    caller: Arc<str>,
    correlation_id: CorrelationId,
}

async fn serve_connection(
    socket: WebSocket,
    state: AppState,
    caller: String,
    correlation_id: CorrelationId,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(state.ws_outbound_capacity);
    let in_flight = Arc::new(Semaphore::new(state.ws_max_in_flight.max(1)));
    let conn = Connection {
        notifier: Arc::new(Notifier::new(
            state.backend,
            Arc::clone(&state.multiplexer),
            outbound_tx.clone(),
        )),
        state,
        outbound: outbound_tx,
        caller: caller.into(),
        correlation_id,
    };

    conn.state.metrics.record_websocket_connection(true);
    info!(caller = %conn.caller, correlation_id = %conn.correlation_id, "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let body = match message {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_bytes()),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(caller = %conn.caller, error = %e, "websocket read failed");
                break;
            }
        };

        // Reading pauses while the connection has `ws_max_in_flight` frames outstanding.
        let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else { break };
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.answer_frame(&body).await;
            drop(permit);
        });
    }

    conn.notifier.close();
    writer.abort();
    conn.state.metrics.record_websocket_connection(false);
    info!(caller = %conn.caller, correlation_id = %conn.correlation_id, "websocket closed");
}

impl Connection {
    async fn answer_frame(&self, body: &[u8]) {
        let ctx = RequestContext::new(&*self.caller, Arc::clone(&self.correlation_id.0))
            .with_notifier(Arc::clone(&self.notifier));
        let reply = answer_within(&self.state.gateway, ctx, body, self.state.request_timeout).await;

        let frame = match serde_json::to_string(&reply) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(caller = %self.caller, error = %e, "failed to encode response");
                return;
            }
        };
        if self.outbound.send(frame).await.is_err() {
            return;
        }
        for id in reply.string_results() {
            self.notifier.release(id);
        }
    }
}
