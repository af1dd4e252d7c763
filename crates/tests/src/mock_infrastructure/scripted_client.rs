//! In-process node client with scripted answers and controllable upstream streams.

use async_trait::async_trait;
use fluxgate_core::{
    node::{NodeClient, NodeError, UpstreamSubscription},
    pubsub::SubscriptionKind,
    types::JsonRpcError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;

type Feed = mpsc::UnboundedSender<Result<Value, NodeError>>;

/// A `NodeClient` whose calls, health and subscriptions are driven by the test.
///
/// Unscripted methods answer `null`. While [`ScriptedClient::set_down`] is on, every
/// call fails with a connection error, which also fails health probes.
pub struct ScriptedClient {
    url: String,
    answers: Mutex<HashMap<String, Result<Value, JsonRpcError>>>,
    calls: Mutex<Vec<(String, Value)>>,
    down: AtomicBool,
    reject_subscriptions: AtomicBool,
    feeds: Mutex<Vec<Feed>>,
    subscribes: AtomicUsize,
    unsubscribes: Arc<AtomicUsize>,
}

impl ScriptedClient {
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        let client = Self {
            url: format!("mock://{name}"),
            answers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            down: AtomicBool::new(false),
            reject_subscriptions: AtomicBool::new(false),
            feeds: Mutex::new(Vec::new()),
            subscribes: AtomicUsize::new(0),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
        };
        client.answer("cfx_epochNumber", json!("0x64"));
        Arc::new(client)
    }

    pub fn answer(&self, method: &str, result: Value) {
        self.answers.lock().insert(method.to_string(), Ok(result));
    }

    pub fn fail(&self, method: &str, code: i32, message: &str) {
        let error = JsonRpcError { code, message: message.to_string(), data: None };
        self.answers.lock().insert(method.to_string(), Err(error));
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// Calls received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Calls of `method` received so far.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    #[must_use]
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Sends `item` to every open upstream stream.
    pub fn push(&self, item: &Value) {
        self.feeds.lock().retain(|feed| feed.send(Ok(item.clone())).is_ok());
    }

    /// Fails every open upstream stream.
    pub fn break_upstreams(&self) {
        for feed in self.feeds.lock().drain(..) {
            let _ = feed.send(Err(NodeError::SubscriptionClosed("connection reset".into())));
        }
    }
}

#[async_trait]
impl NodeClient for ScriptedClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        self.calls.lock().push((method.to_string(), params));

        if self.down.load(Ordering::SeqCst) {
            return Err(NodeError::ConnectionFailed("node is down".into()));
        }
        match self.answers.lock().get(method) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(NodeError::RpcError(error.clone())),
            None => Ok(Value::Null),
        }
    }

    async fn subscribe(
        &self,
        _kind: &SubscriptionKind,
    ) -> Result<Box<dyn UpstreamSubscription>, NodeError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        if self.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(NodeError::RpcError(JsonRpcError {
                code: -32000,
                message: "subscription rejected".into(),
                data: None,
            }));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(tx);
        Ok(Box::new(ScriptedUpstream { rx, unsubscribes: Arc::clone(&self.unsubscribes) }))
    }
}

struct ScriptedUpstream {
    rx: mpsc::UnboundedReceiver<Result<Value, NodeError>>,
    unsubscribes: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSubscription for ScriptedUpstream {
    fn id(&self) -> &str {
        "0xscripted"
    }

    async fn next(&mut self) -> Option<Result<Value, NodeError>> {
        self.rx.recv().await
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), NodeError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
