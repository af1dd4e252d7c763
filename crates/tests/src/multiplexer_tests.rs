//! Shared upstream subscriptions against a mock WebSocket node and a scripted client.

use crate::mock_infrastructure::{endpoint, MockWebSocketServer, ScriptedClient};
use fluxgate_core::{
    config::BackendKind,
    node::{Node, RpcClient},
    proxy::ProxyError,
    pubsub::{
        DownstreamSubscription, Notifier, SubscriptionKey, SubscriptionKind,
        SubscriptionMultiplexer,
    },
    types::EpochTag,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(2);

fn ws_node(server: &MockWebSocketServer) -> Arc<Node> {
    // The HTTP url is never dialed by subscription tests.
    let config = endpoint("ws-0", "http://127.0.0.1:9", Some(server.url()));
    let client = RpcClient::new(&config, BackendKind::Cfx).unwrap();
    Node::new("ws-0", Arc::new(client))
}

async fn next_item(sub: &mut DownstreamSubscription) -> Option<Result<Value, ProxyError>> {
    timeout(WAIT, sub.recv()).await.expect("subscription item timed out")
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_subscribers_share_one_upstream() {
    let server = MockWebSocketServer::new().await.unwrap();
    let node = ws_node(&server);
    let mux = SubscriptionMultiplexer::new(16, None);

    let mut subs = Vec::new();
    for _ in 0..3 {
        subs.push(mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap());
    }

    assert_eq!(server.received("cfx_subscribe"), 1);
    assert_eq!(server.connections(), 1);
    let key = SubscriptionKey::new(&node, &SubscriptionKind::NewHeads);
    assert_eq!(mux.subscriber_count(&key), 3);

    server.send_new_heads(5);
    for sub in &mut subs {
        let head = next_item(sub).await.unwrap().unwrap();
        assert_eq!(head["epochNumber"], json!("0x5"));
    }
}

#[tokio::test]
async fn test_last_detach_unsubscribes_once() {
    let server = MockWebSocketServer::new().await.unwrap();
    let node = ws_node(&server);
    let mux = SubscriptionMultiplexer::new(16, None);

    let first = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();
    let second = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();

    drop(first);
    assert_eq!(mux.active_upstreams(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.received("cfx_unsubscribe"), 0);

    drop(second);
    assert_eq!(mux.active_upstreams(), 0);
    assert!(server.wait_for("cfx_unsubscribe", 1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.received("cfx_unsubscribe"), 1);
}

#[tokio::test]
async fn test_upstream_loss_ends_every_subscriber() {
    let server = MockWebSocketServer::new().await.unwrap();
    let node = ws_node(&server);
    let mux = SubscriptionMultiplexer::new(16, None);
    let key = SubscriptionKey::new(&node, &SubscriptionKind::NewHeads);

    let mut a = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();
    let mut b = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();

    server.drop_connections();

    for sub in [&mut a, &mut b] {
        assert!(matches!(next_item(sub).await, Some(Err(ProxyError::UpstreamDisconnected(_)))));
        assert!(next_item(sub).await.is_none());
    }
    assert!(!mux.contains(&key));

    // A new subscriber after the failure opens a fresh upstream.
    let _c = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();
    assert_eq!(server.received("cfx_subscribe"), 2);
}

#[tokio::test]
async fn test_rejected_subscription_leaves_no_key() {
    let server = MockWebSocketServer::new().await.unwrap();
    server.reject_subscriptions(true);
    let node = ws_node(&server);
    let mux = SubscriptionMultiplexer::new(16, None);

    let err = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap_err();

    assert!(matches!(err, ProxyError::DelegateSubscriptionFailed(_)));
    assert_eq!(mux.active_upstreams(), 0);
}

#[tokio::test]
async fn test_node_without_ws_url_cannot_subscribe() {
    let config = endpoint("http-only", "http://127.0.0.1:9", None);
    let client = RpcClient::new(&config, BackendKind::Cfx).unwrap();
    let node = Node::new("http-only", Arc::new(client));
    let mux = SubscriptionMultiplexer::new(16, None);

    let err = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap_err();

    assert!(matches!(err, ProxyError::DelegateSubscriptionFailed(_)));
}

#[tokio::test]
async fn test_kinds_and_params_get_separate_upstreams() {
    let client = ScriptedClient::new("full-0");
    let node = Node::new("full-0", client.clone());
    let mux = SubscriptionMultiplexer::new(16, None);

    let _heads = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();
    let _mined =
        mux.attach(&node, SubscriptionKind::Epochs(EpochTag::LatestMined)).await.unwrap();
    let _state =
        mux.attach(&node, SubscriptionKind::Epochs(EpochTag::LatestState)).await.unwrap();
    let _mined_again =
        mux.attach(&node, SubscriptionKind::Epochs(EpochTag::LatestMined)).await.unwrap();

    assert_eq!(client.subscribes(), 3);
    assert_eq!(mux.active_upstreams(), 3);
}

#[tokio::test]
async fn test_slow_subscriber_does_not_stall_others() {
    let client = ScriptedClient::new("full-0");
    let node = Node::new("full-0", client.clone());
    let mux = SubscriptionMultiplexer::new(2, None);

    let mut slow = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();
    let mut fast = mux.attach(&node, SubscriptionKind::NewHeads).await.unwrap();

    for height in 0..5 {
        client.push(&json!({ "height": height }));
        let item = next_item(&mut fast).await.unwrap().unwrap();
        assert_eq!(item["height"], json!(height));
    }

    // The slow queue kept only what fit.
    assert_eq!(next_item(&mut slow).await.unwrap().unwrap()["height"], json!(0));
    assert_eq!(next_item(&mut slow).await.unwrap().unwrap()["height"], json!(1));
    assert!(timeout(Duration::from_millis(100), slow.recv()).await.is_err());
}

#[tokio::test]
async fn test_notifier_holds_notifications_until_released() {
    let client = ScriptedClient::new("full-0");
    let node = Node::new("full-0", client.clone());
    let mux = Arc::new(SubscriptionMultiplexer::new(16, None));
    let (tx, mut rx) = mpsc::channel(16);
    let notifier = Notifier::new(BackendKind::Cfx, Arc::clone(&mux), tx);

    let id = notifier.subscribe(&node, SubscriptionKind::NewHeads).await.unwrap();
    client.push(&json!({ "height": "0x1" }));
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

    notifier.release_pending();
    let frame: Value = serde_json::from_str(&timeout(WAIT, rx.recv()).await.unwrap().unwrap())
        .unwrap();
    assert_eq!(frame["method"], json!("cfx_subscription"));
    assert_eq!(frame["params"]["subscription"], json!(id));
    assert_eq!(frame["params"]["result"], json!({ "height": "0x1" }));

    assert!(notifier.unsubscribe(&id));
    assert!(!notifier.unsubscribe(&id));
    assert!(eventually(|| client.unsubscribes() == 1).await);
    assert_eq!(mux.active_upstreams(), 0);
}

#[tokio::test]
async fn test_notifier_reports_upstream_loss_as_error_notification() {
    let client = ScriptedClient::new("full-0");
    let node = Node::new("full-0", client.clone());
    let mux = Arc::new(SubscriptionMultiplexer::new(16, None));
    let (tx, mut rx) = mpsc::channel(16);
    let notifier = Notifier::new(BackendKind::Cfx, Arc::clone(&mux), tx);

    let id = notifier.subscribe(&node, SubscriptionKind::NewHeads).await.unwrap();
    notifier.release_pending();
    client.break_upstreams();

    let frame: Value = serde_json::from_str(&timeout(WAIT, rx.recv()).await.unwrap().unwrap())
        .unwrap();
    assert_eq!(frame["params"]["subscription"], json!(id));
    assert!(frame["params"]["error"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("connection reset")));
    assert!(eventually(|| mux.active_upstreams() == 0).await);

    // The ended subscription no longer counts and cannot be unsubscribed.
    assert!(eventually(|| notifier.active() == 0).await);
    assert!(!notifier.unsubscribe(&id));
}

#[tokio::test]
async fn test_closing_notifier_releases_upstreams() {
    let client = ScriptedClient::new("full-0");
    let node = Node::new("full-0", client.clone());
    let mux = Arc::new(SubscriptionMultiplexer::new(16, None));
    let (tx, _rx) = mpsc::channel(16);
    let notifier = Notifier::new(BackendKind::Cfx, Arc::clone(&mux), tx);

    notifier.subscribe(&node, SubscriptionKind::NewHeads).await.unwrap();
    notifier.subscribe(&node, SubscriptionKind::Epochs(EpochTag::LatestState)).await.unwrap();
    assert_eq!(notifier.active(), 2);

    notifier.close();

    assert_eq!(notifier.active(), 0);
    assert!(eventually(|| client.unsubscribes() == 2).await);
    assert_eq!(mux.active_upstreams(), 0);
}
