//! Health-aware, session-sticky node selection.
//!
//! The [`ClientProvider`] owns one [`ClientGroup`] per [`GroupKey`]. Groups are wired lazily
//! on first use through a [`NodeConnector`]; concurrent first callers share a single setup.
//! Selection itself is in-memory: it reads each node's published status and never talks to
//! the network.

pub mod group;
pub mod hashing;
pub mod routing;

pub use group::{ClientGroup, Selection};
pub use routing::{routable, CfxClientProvider, EthClientProvider, RoutableClientProvider};

use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    config::{BackendKind, NodeEndpoint, NodesConfig},
    metrics::MetricsCollector,
    node::{HealthMonitor, Node, NodeError, RpcClient, Status},
    proxy::errors::ProxyError,
};

/// Endpoint class a node group serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKey {
    Default,
    /// Log queries, which are expensive enough to isolate.
    Logs,
    /// Nodes with a WebSocket endpoint for subscriptions.
    Ws,
}

impl GroupKey {
    pub const ALL: [GroupKey; 3] = [GroupKey::Default, GroupKey::Logs, GroupKey::Ws];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Logs => "logs",
            Self::Ws => "ws",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::Default),
            "logs" => Some(Self::Logs),
            "ws" => Some(Self::Ws),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Default => 0,
            Self::Logs => 1,
            Self::Ws => 2,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a live [`Node`] from its configuration.
pub trait NodeConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the node's transport cannot be constructed.
    fn connect(&self, group: GroupKey, endpoint: &NodeEndpoint) -> Result<Arc<Node>, NodeError>;
}

/// Connects configured endpoints over HTTP/WebSocket and starts their health monitors.
pub struct RpcNodeConnector {
    backend: BackendKind,
    monitor: HealthMonitor,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RpcNodeConnector {
    #[must_use]
    pub fn new(
        backend: BackendKind,
        monitor: HealthMonitor,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self { backend, monitor, metrics }
    }
}

impl NodeConnector for RpcNodeConnector {
    fn connect(&self, group: GroupKey, endpoint: &NodeEndpoint) -> Result<Arc<Node>, NodeError> {
        let client = Arc::new(RpcClient::new(endpoint, self.backend)?);
        tracing::debug!(group = group.as_str(), node = %endpoint.name, url = %endpoint.url, "connecting node");
        Ok(Node::with_monitor(endpoint.name.as_str(), client, &self.monitor, self.metrics.clone()))
    }
}

/// Per-node entry of a provider snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub url: String,
    pub status: Arc<Status>,
}

/// Per-group entry of a provider snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub group: GroupKey,
    pub available: usize,
    pub nodes: Vec<NodeSnapshot>,
}

/// Named node groups with lazy wiring and caller affinity.
pub struct ClientProvider {
    endpoints: HashMap<GroupKey, Vec<NodeEndpoint>>,
    connector: Arc<dyn NodeConnector>,
    groups: [OnceLock<Arc<ClientGroup>>; 3],
    metrics: Option<Arc<MetricsCollector>>,
}

impl ClientProvider {
    #[must_use]
    pub fn new(
        config: &NodesConfig,
        connector: Arc<dyn NodeConnector>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let endpoints = GroupKey::ALL
            .into_iter()
            .filter_map(|key| {
                let members = config.group(key);
                (!members.is_empty()).then(|| (key, members.to_vec()))
            })
            .collect();

        Self { endpoints, connector, groups: Default::default(), metrics }
    }

    /// Group that actually serves `key`: an unconfigured `logs` group is served by `default`.
    #[must_use]
    pub fn resolve(&self, key: GroupKey) -> GroupKey {
        match key {
            GroupKey::Logs if !self.endpoints.contains_key(&GroupKey::Logs) => GroupKey::Default,
            other => other,
        }
    }

    /// Returns the group serving `key`, wiring it on first use.
    pub fn group(&self, key: GroupKey) -> &Arc<ClientGroup> {
        let key = self.resolve(key);
        self.groups[key.index()].get_or_init(|| self.wire(key))
    }

    fn wire(&self, key: GroupKey) -> Arc<ClientGroup> {
        let endpoints = self.endpoints.get(&key).map_or(&[][..], Vec::as_slice);
        let mut nodes = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            match self.connector.connect(key, endpoint) {
                Ok(node) => nodes.push(node),
                Err(e) => tracing::error!(
                    group = key.as_str(),
                    node = %endpoint.name,
                    error = %e,
                    "failed to connect node"
                ),
            }
        }

        tracing::info!(group = key.as_str(), nodes = nodes.len(), "node group ready");
        Arc::new(ClientGroup::new(key, nodes))
    }

    /// Selects a node in `group` for `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NoHealthyClient`] when the group has no available node.
    pub fn get_client(&self, caller: &str, group: GroupKey) -> Result<Arc<Node>, ProxyError> {
        let group = self.group(group);

        match group.select(caller) {
            Some((node, how)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_node_selection(
                        group.key().as_str(),
                        node.name(),
                        how == Selection::Sticky,
                    );
                }
                tracing::trace!(group = group.key().as_str(), node = %node.name(), caller, "node selected");
                Ok(node)
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_no_healthy_client(group.key().as_str());
                }
                tracing::warn!(group = group.key().as_str(), members = group.len(), "no healthy node available");
                Err(ProxyError::NoHealthyClient { group: group.key().as_str() })
            }
        }
    }

    /// Whether `group` currently has at least one available node.
    #[must_use]
    pub fn has_available(&self, group: GroupKey) -> bool {
        self.group(group).available_count() > 0
    }

    /// Health view of every wired group.
    #[must_use]
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.groups
            .iter()
            .filter_map(OnceLock::get)
            .map(|group| GroupSnapshot {
                group: group.key(),
                available: group.available_count(),
                nodes: group
                    .nodes()
                    .iter()
                    .map(|node| NodeSnapshot {
                        name: node.name().to_string(),
                        url: node.url().to_string(),
                        status: node.status(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Closes every wired node.
    pub fn close(&self) {
        for group in self.groups.iter().filter_map(OnceLock::get) {
            group.close();
        }
    }
}
