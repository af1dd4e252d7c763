//! In-process gateway state for the handler tests.

use async_trait::async_trait;
use fluxgate_core::{
    config::{AppConfig, BackendKind, NodeEndpoint},
    filter::FilterLimits,
    metrics::MetricsCollector,
    middleware::{ClientBindingInterceptor, MiddlewareChain},
    node::{Node, NodeClient, NodeError, UpstreamSubscription},
    provider::{routable, ClientProvider, GroupKey, NodeConnector},
    proxy::{Gateway, ProxyEngine, RequestDispatcher},
    pubsub::{SubscriptionKind, SubscriptionMultiplexer},
};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::AppState;

struct OneShotUpstream {
    item: Option<Value>,
    unsubscribes: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSubscription for OneShotUpstream {
    fn id(&self) -> &str {
        "0xup"
    }

    async fn next(&mut self) -> Option<Result<Value, NodeError>> {
        match self.item.take() {
            Some(item) => Some(Ok(item)),
            None => std::future::pending().await,
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), NodeError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers `cfx_epochNumber` with `0x2a` and `cfx_getLogs` with `[]` after one second;
/// each upstream subscription yields one head.
#[derive(Default)]
pub struct HeadsClient {
    pub subscribes: AtomicUsize,
    pub unsubscribes: Arc<AtomicUsize>,
}

#[async_trait]
impl NodeClient for HeadsClient {
    fn url(&self) -> &str {
        "mock://heads"
    }

    async fn call(&self, method: &str, _: Value) -> Result<Value, NodeError> {
        match method {
            "cfx_epochNumber" => Ok(json!("0x2a")),
            "cfx_getLogs" => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(json!([]))
            }
            _ => Ok(Value::Null),
        }
    }

    async fn subscribe(
        &self,
        _: &SubscriptionKind,
    ) -> Result<Box<dyn UpstreamSubscription>, NodeError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(OneShotUpstream {
            item: Some(json!({ "height": "0x10" })),
            unsubscribes: Arc::clone(&self.unsubscribes),
        }))
    }
}

/// Connects every endpoint to the same in-process client. Status stays `Unknown`.
struct InProcess(Arc<HeadsClient>);

impl NodeConnector for InProcess {
    fn connect(&self, _: GroupKey, endpoint: &NodeEndpoint) -> Result<Arc<Node>, NodeError> {
        Ok(Node::new(endpoint.name.as_str(), Arc::clone(&self.0) as Arc<dyn NodeClient>))
    }
}

pub fn config(default_nodes: usize) -> AppConfig {
    let mut config = AppConfig::default();
    let members = (0..default_nodes)
        .map(|i| NodeEndpoint {
            name: format!("full-{i}"),
            url: format!("http://127.0.0.1:{}", 12537 + i),
            ws_url: None,
            timeout_seconds: 5,
        })
        .collect();
    config.nodes.groups.insert("default".into(), members);
    config
}

/// Gateway with client binding only, backed by `client`.
pub fn state(config: &AppConfig, client: Arc<HeadsClient>) -> AppState {
    let routing = routable(
        BackendKind::Cfx,
        ClientProvider::new(&config.nodes, Arc::new(InProcess(client)), None),
    );
    let chain = MiddlewareChain::new(vec![Arc::new(ClientBindingInterceptor::new(
        BackendKind::Cfx,
        Arc::clone(&routing),
    ))]);
    let engine = ProxyEngine::new(
        BackendKind::Cfx,
        RequestDispatcher::new(None, None),
        FilterLimits::default(),
        None,
        None,
    );

    AppState {
        gateway: Arc::new(Gateway::new(chain, Arc::new(engine), None)),
        routing,
        multiplexer: Arc::new(SubscriptionMultiplexer::new(16, None)),
        metrics: Arc::new(MetricsCollector::new()),
        backend: BackendKind::Cfx,
        request_timeout: Duration::from_secs(5),
        ws_outbound_capacity: 16,
        ws_max_in_flight: 4,
    }
}
