//! HTTP and WebSocket front end of the fluxgate gateway.
//!
//! [`init_services`] wires the core components from an [`AppConfig`] and [`create_app`]
//! mounts them on an axum router:
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /` | JSON-RPC, single or batch |
//! | `GET /ws` | JSON-RPC over WebSocket, with subscriptions |
//! | `GET /health` | node and group snapshot |
//! | `GET /metrics` | Prometheus text |

pub mod middleware;
pub mod router;
pub mod websocket;

#[cfg(test)]
mod testing;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use fluxgate_core::{
    config::{AppConfig, BackendKind},
    metrics::MetricsCollector,
    middleware::{
        ClientBindingInterceptor, Interceptor, LoggingInterceptor, MetricsInterceptor,
        MiddlewareChain, RateLimitInterceptor, RateLimiter,
    },
    node::HealthMonitor,
    provider::{routable, ClientProvider, RoutableClientProvider, RpcNodeConnector},
    proxy::{Gateway, ProxyEngine, RequestDispatcher},
    pubsub::SubscriptionMultiplexer,
    relay::{RelayPool, TxRelayer},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer};
use tracing::info;

/// Outbound frames buffered per WebSocket connection.
const WS_OUTBOUND_CAPACITY: usize = 1024;

/// Frames answered concurrently per WebSocket connection.
const WS_MAX_IN_FLIGHT: usize = 32;

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub routing: Arc<dyn RoutableClientProvider>,
    pub multiplexer: Arc<SubscriptionMultiplexer>,
    pub metrics: Arc<MetricsCollector>,
    pub backend: BackendKind,
    pub request_timeout: Duration,
    pub ws_outbound_capacity: usize,
    pub ws_max_in_flight: usize,
}

/// Wired state plus the background tasks started for it.
pub struct Services {
    pub state: AppState,
    pub background: Vec<JoinHandle<()>>,
}

/// Builds the chain `rate limit -> metrics -> logging -> client binding`, skipping the
/// stages disabled in `config`.
#[must_use]
pub fn build_chain(
    config: &AppConfig,
    routing: Arc<dyn RoutableClientProvider>,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<MetricsCollector>>,
) -> MiddlewareChain {
    let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(4);

    if let Some(limiter) = limiter {
        interceptors.push(Arc::new(RateLimitInterceptor::new(limiter, metrics.clone())));
    }
    if let Some(metrics) = metrics {
        interceptors.push(Arc::new(MetricsInterceptor::new(metrics)));
    }
    interceptors.push(Arc::new(LoggingInterceptor));
    interceptors.push(Arc::new(ClientBindingInterceptor::new(config.nodes.backend, routing)));

    MiddlewareChain::new(interceptors)
}

/// Wires provider, engine, multiplexer and relay from `config` and starts their
/// background tasks. Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the relay nodes cannot be set up.
pub fn init_services(
    config: &AppConfig,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Services> {
    let backend = config.nodes.backend;
    let metrics = Arc::new(MetricsCollector::new());
    let enabled_metrics = config.metrics.enabled.then(|| Arc::clone(&metrics));
    let mut background = Vec::new();

    let monitor = HealthMonitor::from_config(&config.health_check, backend);
    let connector = Arc::new(RpcNodeConnector::new(backend, monitor, enabled_metrics.clone()));
    let routing = routable(
        backend,
        ClientProvider::new(&config.nodes, connector, enabled_metrics.clone()),
    );

    let limiter = if config.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        background.push(
            limiter.start_cleanup_task(enabled_metrics.clone(), shutdown_tx.subscribe()),
        );
        Some(limiter)
    } else {
        None
    };

    let relay: Option<Arc<dyn RelayPool>> = if config.relay.enabled {
        let relayer = TxRelayer::from_config(&config.relay, backend, enabled_metrics.clone())
            .map_err(|e| anyhow::anyhow!("transaction relay setup failed: {e}"))?;
        if let Some(handle) = relayer.start_with_shutdown(shutdown_tx.subscribe()) {
            background.push(handle);
        }
        info!(nodes = config.relay.nodes.len(), "transaction relay enabled");
        Some(Arc::new(relayer))
    } else {
        None
    };

    let engine = ProxyEngine::new(
        backend,
        RequestDispatcher::new(None, enabled_metrics.clone()),
        config.log_filter.limits(),
        relay,
        enabled_metrics.clone(),
    );
    let chain = build_chain(config, Arc::clone(&routing), limiter, enabled_metrics.clone());
    info!(interceptors = ?chain.names(), "middleware chain ready");

    let multiplexer = Arc::new(SubscriptionMultiplexer::from_config(
        &config.subscription,
        enabled_metrics.clone(),
    ));

    let state = AppState {
        gateway: Arc::new(Gateway::new(chain, Arc::new(engine), enabled_metrics)),
        routing,
        multiplexer,
        metrics,
        backend,
        request_timeout: config.request_timeout(),
        ws_outbound_capacity: WS_OUTBOUND_CAPACITY,
        ws_max_in_flight: WS_MAX_IN_FLIGHT,
    };

    Ok(Services { state, background })
}

/// Mounts the routes with concurrency, body size, compression and request id layers.
pub fn create_app(state: AppState, config: &AppConfig) -> Router {
    let (set_request_id, propagate_request_id) = middleware::create_request_id_layers();

    Router::new()
        .route("/", post(router::handle_rpc))
        .route("/ws", get(websocket::handle_ws))
        .route("/health", get(router::handle_health))
        .route("/metrics", get(router::handle_metrics))
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(CompressionLayer::new())
        .layer(propagate_request_id)
        .layer(set_request_id)
}
