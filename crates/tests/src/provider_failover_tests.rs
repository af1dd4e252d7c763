//! Caller affinity and failover across a live, probed node group.

use crate::mock_infrastructure::{endpoint, wait_for_availability, RpcMockBuilder, ScriptedClient};
use fluxgate_core::{
    config::{BackendKind, HealthCheckConfig, NodeEndpoint, NodesConfig},
    node::{HealthMonitor, HealthState, Node, NodeError},
    provider::{routable, ClientProvider, GroupKey, NodeConnector, RpcNodeConnector},
    proxy::ProxyError,
};
use std::{collections::HashMap, sync::Arc, time::Duration};

const WAIT: Duration = Duration::from_secs(2);

fn fast_monitor() -> HealthMonitor {
    HealthMonitor::from_config(
        &HealthCheckConfig { interval_ms: 20, failure_threshold: 1, probe_timeout_ms: 200 },
        BackendKind::Cfx,
    )
}

/// Wires each endpoint to the scripted client registered under its name, with a real
/// health monitor.
struct ScriptedConnector {
    clients: HashMap<String, Arc<ScriptedClient>>,
    monitor: HealthMonitor,
}

impl NodeConnector for ScriptedConnector {
    fn connect(&self, _group: GroupKey, endpoint: &NodeEndpoint) -> Result<Arc<Node>, NodeError> {
        let client = self
            .clients
            .get(&endpoint.name)
            .cloned()
            .ok_or_else(|| NodeError::ConnectionFailed(format!("unknown node {}", endpoint.name)))?;
        Ok(Node::with_monitor(endpoint.name.as_str(), client, &self.monitor, None))
    }
}

struct Pool {
    provider: ClientProvider,
    clients: Vec<Arc<ScriptedClient>>,
}

impl Pool {
    fn new(count: usize) -> Self {
        let names: Vec<String> = (0..count).map(|i| format!("full-{i}")).collect();
        let clients: Vec<_> = names.iter().map(|name| ScriptedClient::new(name)).collect();
        let endpoints =
            names.iter().map(|name| endpoint(name, &format!("mock://{name}"), None)).collect();

        let config = NodesConfig {
            backend: BackendKind::Cfx,
            groups: HashMap::from([("default".to_string(), endpoints)]),
        };
        let connector = ScriptedConnector {
            clients: names.into_iter().zip(clients.iter().cloned()).collect(),
            monitor: fast_monitor(),
        };

        Self { provider: ClientProvider::new(&config, Arc::new(connector), None), clients }
    }

    fn node(&self, index: usize) -> Arc<Node> {
        Arc::clone(&self.provider.group(GroupKey::Default).nodes()[index])
    }

    async fn wait_all_healthy(&self) {
        for node in self.provider.group(GroupKey::Default).nodes().iter() {
            let deadline = tokio::time::Instant::now() + WAIT;
            while node.status().state != HealthState::Healthy {
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "{} never became healthy",
                    node.name()
                );
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    fn assignments(&self, callers: &[String]) -> HashMap<String, String> {
        callers
            .iter()
            .map(|caller| {
                let node = self.provider.get_client(caller, GroupKey::Default).unwrap();
                (caller.clone(), node.name().to_string())
            })
            .collect()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.provider.close();
    }
}

fn callers(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("198.51.100.{i}")).collect()
}

#[tokio::test]
async fn test_callers_stay_on_their_node() {
    let pool = Pool::new(3);
    pool.wait_all_healthy().await;
    let callers = callers(60);

    let first = pool.assignments(&callers);
    let second = pool.assignments(&callers);

    assert_eq!(first, second);
    let used: std::collections::HashSet<_> = first.values().collect();
    assert!(used.len() > 1, "60 callers should spread over more than one node");
}

#[tokio::test]
async fn test_only_callers_of_failed_node_move() {
    let pool = Pool::new(3);
    pool.wait_all_healthy().await;
    let callers = callers(60);
    let before = pool.assignments(&callers);

    let failed = pool.node(1);
    pool.clients[1].set_down(true);
    assert!(wait_for_availability(&failed, false, WAIT).await);

    let after = pool.assignments(&callers);
    for caller in &callers {
        if before[caller] == failed.name() {
            assert_ne!(after[caller], failed.name(), "{caller} should have moved");
        } else {
            assert_eq!(after[caller], before[caller], "{caller} should not have moved");
        }
    }
}

#[tokio::test]
async fn test_moved_callers_stay_after_recovery() {
    let pool = Pool::new(2);
    pool.wait_all_healthy().await;
    let callers = callers(40);
    let before = pool.assignments(&callers);

    let failed = pool.node(0);
    pool.clients[0].set_down(true);
    assert!(wait_for_availability(&failed, false, WAIT).await);
    let moved = pool.assignments(&callers);

    pool.clients[0].set_down(false);
    assert!(wait_for_availability(&failed, true, WAIT).await);
    let recovered = pool.assignments(&callers);

    assert_eq!(moved, recovered);
    assert!(before.values().any(|name| name == failed.name()));
    assert!(recovered.values().all(|name| name != failed.name()));
}

#[tokio::test]
async fn test_all_nodes_down_is_no_healthy_client() {
    let pool = Pool::new(2);
    pool.wait_all_healthy().await;

    for (index, client) in pool.clients.iter().enumerate() {
        client.set_down(true);
        assert!(wait_for_availability(&pool.node(index), false, WAIT).await);
    }

    let err = pool.provider.get_client("198.51.100.1", GroupKey::Default).unwrap_err();
    assert!(matches!(err, ProxyError::NoHealthyClient { group: "default" }));
    assert!(!pool.provider.has_available(GroupKey::Default));
}

#[tokio::test]
async fn test_logs_fall_back_to_default_group() {
    let pool = Pool::new(1);

    assert_eq!(pool.provider.resolve(GroupKey::Logs), GroupKey::Default);
    let node = pool.provider.get_client("198.51.100.7", GroupKey::Logs).unwrap();
    assert_eq!(node.name(), "full-0");
}

#[tokio::test]
async fn test_unconfigured_ws_group_has_no_client() {
    let pool = Pool::new(1);

    let err = pool.provider.get_client("198.51.100.7", GroupKey::Ws).unwrap_err();
    assert!(matches!(err, ProxyError::NoHealthyClient { group: "ws" }));
}

#[tokio::test]
async fn test_http_node_health_follows_probe_results() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_epoch_number(0x1234);

    let config = NodesConfig {
        backend: BackendKind::Cfx,
        groups: HashMap::from([(
            "default".to_string(),
            vec![endpoint("http-0", &mock.url(), None)],
        )]),
    };
    let connector = RpcNodeConnector::new(BackendKind::Cfx, fast_monitor(), None);
    let routing =
        routable(BackendKind::Cfx, ClientProvider::new(&config, Arc::new(connector), None));

    let node = routing.client_for("198.51.100.2", "cfx_getBalance").unwrap();
    assert!(wait_for_availability(&node, true, WAIT).await);
    let deadline = tokio::time::Instant::now() + WAIT;
    while node.status().epoch != Some(0x1234) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(node.status().epoch, Some(0x1234));

    mock.reset().mock_server_error();
    assert!(wait_for_availability(&node, false, WAIT).await);
    assert!(matches!(
        routing.client_for("198.51.100.2", "cfx_getBalance"),
        Err(ProxyError::NoHealthyClient { .. })
    ));

    routing.provider().close();
    assert_eq!(node.status().state, HealthState::Closed);
}
