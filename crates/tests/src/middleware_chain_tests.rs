//! Middleware chain ordering and interaction tests
//!
//! These tests run the production interceptors (rate limiting, logging and client binding)
//! in front of a real proxy engine and check:
//! 1. A rejection in an early stage keeps later stages and the node untouched
//! 2. After-hooks still observe short-circuited calls
//! 3. Batches are charged once, as a whole
//! 4. Calls that need no node are never bound

use crate::mock_infrastructure::{endpoint, engine_with_store, ScriptedClient};
use async_trait::async_trait;
use fluxgate_core::{
    config::{BackendKind, NodeEndpoint, NodesConfig},
    middleware::{
        ClientBindingInterceptor, Interceptor, LoggingInterceptor, MiddlewareChain,
        RateLimitInterceptor, RateLimiter, RequestContext,
    },
    node::{Node, NodeClient, NodeError},
    provider::{routable, ClientProvider, GroupKey, NodeConnector},
    proxy::{Gateway, ProxyError},
    types::JsonRpcRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

/// Every endpoint is served by the same scripted client, without a monitor.
struct SharedConnector(Arc<ScriptedClient>);

impl NodeConnector for SharedConnector {
    fn connect(&self, _group: GroupKey, endpoint: &NodeEndpoint) -> Result<Arc<Node>, NodeError> {
        Ok(Node::new(endpoint.name.as_str(), Arc::clone(&self.0) as Arc<dyn NodeClient>))
    }
}

/// Outermost stage that records what the chain saw.
#[derive(Default)]
struct Probe {
    before: Mutex<Vec<String>>,
    after: Mutex<Vec<(String, Result<Value, i32>, Option<String>)>>,
}

#[async_trait]
impl Interceptor for Probe {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn before(
        &self,
        _ctx: &mut RequestContext,
        request: &JsonRpcRequest,
    ) -> Result<(), ProxyError> {
        self.before.lock().push(request.method.clone());
        Ok(())
    }

    fn after(
        &self,
        ctx: &RequestContext,
        request: &JsonRpcRequest,
        outcome: &Result<Value, ProxyError>,
    ) {
        let outcome = outcome.as_ref().map(Clone::clone).map_err(ProxyError::code);
        let node = ctx.node.as_ref().map(|n| n.name().to_string());
        self.after.lock().push((request.method.clone(), outcome, node));
    }
}

struct Harness {
    gateway: Gateway,
    client: Arc<ScriptedClient>,
    probe: Arc<Probe>,
}

impl Harness {
    fn new(max_tokens: u32, nodes: usize) -> Self {
        let client = ScriptedClient::new("shared");
        client.answer("cfx_getBalance", json!("0x3e8"));

        let endpoints: Vec<_> =
            (0..nodes).map(|i| endpoint(&format!("full-{i}"), "mock://shared", None)).collect();
        let config = NodesConfig {
            backend: BackendKind::Cfx,
            groups: HashMap::from([("default".to_string(), endpoints)]),
        };
        let provider =
            ClientProvider::new(&config, Arc::new(SharedConnector(Arc::clone(&client))), None);
        let routing = routable(BackendKind::Cfx, provider);

        let probe = Arc::new(Probe::default());
        let limiter = Arc::new(RateLimiter::new(max_tokens, 0));
        let chain = MiddlewareChain::new(vec![
            Arc::clone(&probe) as Arc<dyn Interceptor>,
            Arc::new(RateLimitInterceptor::new(limiter, None)),
            Arc::new(LoggingInterceptor),
            Arc::new(ClientBindingInterceptor::new(BackendKind::Cfx, routing)),
        ]);

        let gateway = Gateway::new(chain, Arc::new(engine_with_store(None)), None);
        Self { gateway, client, probe }
    }
}

fn request(method: &str, params: Value, id: u64) -> JsonRpcRequest {
    JsonRpcRequest::new(method, Some(params), json!(id))
}

fn balance(id: u64) -> JsonRpcRequest {
    request("cfx_getBalance", json!(["cfx:aak2rra2njvd77ezwjvx04kkds9fzagfe6ku8scz91"]), id)
}

#[tokio::test]
async fn test_chain_order_is_stable() {
    let harness = Harness::new(10, 1);

    assert_eq!(
        harness.gateway.chain().names(),
        ["probe", "rate_limit", "logging", "client_binding"]
    );
}

#[tokio::test]
async fn test_bound_call_reaches_node() {
    let harness = Harness::new(10, 2);

    let response =
        harness.gateway.handle(RequestContext::new("198.51.100.1", "c-1"), &balance(1)).await;

    assert_eq!(response.result, Some(json!("0x3e8")));
    assert_eq!(harness.client.call_count("cfx_getBalance"), 1);
    let after = harness.probe.after.lock();
    assert_eq!(after.len(), 1);
    assert!(after[0].2.as_deref().is_some_and(|name| name.starts_with("full-")));
}

#[tokio::test]
async fn test_rate_limited_call_stops_before_binding() {
    let harness = Harness::new(1, 1);

    let first =
        harness.gateway.handle(RequestContext::new("198.51.100.1", "c-1"), &balance(1)).await;
    let second =
        harness.gateway.handle(RequestContext::new("198.51.100.1", "c-2"), &balance(2)).await;

    assert!(first.error.is_none());
    let error = second.error.unwrap();
    assert_eq!(error.code, -32005);
    assert_eq!(*second.id, json!(2));
    assert_eq!(harness.client.call_count("cfx_getBalance"), 1);

    // The probe's after-hook still sees the rejection, with no node bound.
    let after = harness.probe.after.lock();
    assert_eq!(after[1], ("cfx_getBalance".to_string(), Err(-32005), None));
}

#[tokio::test]
async fn test_limits_are_per_caller() {
    let harness = Harness::new(1, 1);

    let a = harness.gateway.handle(RequestContext::new("198.51.100.1", "c-1"), &balance(1)).await;
    let b = harness.gateway.handle(RequestContext::new("198.51.100.2", "c-2"), &balance(2)).await;

    assert!(a.error.is_none());
    assert!(b.error.is_none());
}

#[tokio::test]
async fn test_batch_is_charged_once_by_weight() {
    let harness = Harness::new(3, 1);
    let ctx = RequestContext::new("198.51.100.1", "batch-1");

    let batch = vec![balance(1), balance(2), balance(3)];
    let responses = harness.gateway.handle_batch(&ctx, &batch).await;

    assert!(responses.iter().all(|r| r.error.is_none()));
    assert_eq!(harness.client.call_count("cfx_getBalance"), 3);

    let next =
        harness.gateway.handle(RequestContext::new("198.51.100.1", "c-4"), &balance(4)).await;
    assert_eq!(next.error.unwrap().code, -32005);
}

#[tokio::test]
async fn test_batch_veto_answers_every_entry() {
    // Two log queries weigh 4 tokens, one more than the bucket holds.
    let harness = Harness::new(3, 1);
    let ctx = RequestContext::new("198.51.100.1", "batch-2");

    let batch = vec![
        request("cfx_getLogs", json!([{ "fromEpoch": "0x1", "toEpoch": "0x2" }]), 10),
        request("cfx_getLogs", json!([{ "fromEpoch": "0x3", "toEpoch": "0x4" }]), 11),
    ];
    let responses = harness.gateway.handle_batch(&ctx, &batch).await;

    let ids: Vec<Value> = responses.iter().map(|r| (*r.id).clone()).collect();
    assert_eq!(ids, vec![json!(10), json!(11)]);
    assert!(responses.iter().all(|r| r.error.as_ref().map(|e| e.code) == Some(-32005)));
    assert!(harness.probe.before.lock().is_empty());
    assert!(harness.client.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_method_is_not_bound() {
    // No configured node: binding would fail with -32603 if it ran.
    let harness = Harness::new(10, 0);

    let call = request("debug_traceCall", json!([]), 1);
    let response = harness.gateway.handle(RequestContext::new("198.51.100.1", "c-1"), &call).await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("debug_traceCall"));
}

#[tokio::test]
async fn test_no_healthy_node_is_internal_error() {
    let harness = Harness::new(10, 0);

    let response =
        harness.gateway.handle(RequestContext::new("198.51.100.1", "c-1"), &balance(1)).await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("no healthy client"));
}

#[tokio::test]
async fn test_subscribe_without_notifier_is_unsupported() {
    let harness = Harness::new(10, 0);

    let response = harness
        .gateway
        .handle(
            RequestContext::new("198.51.100.1", "c-1"),
            &request("cfx_subscribe", json!(["newHeads"]), 1),
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert_eq!(error.message, "notifications not supported");
}
