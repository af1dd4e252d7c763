use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use super::{hashing, GroupKey};
use crate::node::Node;

/// Sticky entries kept per group before the table is reset.
const MAX_STICKY_ENTRIES: usize = 65_536;

/// How a caller was matched to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The cached node was still available.
    Sticky,
    /// A node was (re)computed from the healthy subset.
    Assigned,
}

/// Named, ordered set of nodes plus the caller affinity table.
///
/// The member list lives behind `ArcSwap`, so selection reads a snapshot without locking and
/// membership changes never block a request.
pub struct ClientGroup {
    key: GroupKey,
    nodes: ArcSwap<Vec<Arc<Node>>>,
    sticky: DashMap<String, Arc<Node>>,
}

impl ClientGroup {
    #[must_use]
    pub fn new(key: GroupKey, nodes: Vec<Arc<Node>>) -> Self {
        Self { key, nodes: ArcSwap::from_pointee(nodes), sticky: DashMap::new() }
    }

    #[must_use]
    pub fn key(&self) -> GroupKey {
        self.key
    }

    /// Current members in configuration order.
    #[must_use]
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }

    #[must_use]
    pub fn available_count(&self) -> usize {
        self.nodes.load().iter().filter(|n| n.is_available()).count()
    }

    /// Appends a node. A node with the same name is replaced and closed.
    pub fn add_node(&self, node: Arc<Node>) {
        let mut replaced = None;
        self.nodes.rcu(|current| {
            let mut next: Vec<Arc<Node>> =
                current.iter().filter(|n| n.name() != node.name()).cloned().collect();
            replaced = current.iter().find(|n| n.name() == node.name()).cloned();
            next.push(Arc::clone(&node));
            next
        });
        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old, &node) {
                old.close();
            }
        }
        tracing::info!(group = self.key.as_str(), node = %node.name(), "node added to group");
    }

    /// Removes and closes the named node. Sticky entries pointing at it are reselected on
    /// their next use.
    pub fn remove_node(&self, name: &str) -> Option<Arc<Node>> {
        let mut removed = None;
        self.nodes.rcu(|current| {
            removed = current.iter().find(|n| n.name() == name).cloned();
            current.iter().filter(|n| n.name() != name).cloned().collect::<Vec<_>>()
        });
        if let Some(node) = &removed {
            node.close();
            tracing::info!(group = self.key.as_str(), node = %name, "node removed from group");
        }
        removed
    }

    /// Returns the caller's node, reusing the cached assignment while it stays available.
    #[must_use]
    pub fn select(&self, caller: &str) -> Option<(Arc<Node>, Selection)> {
        if let Some(cached) = self.sticky.get(caller) {
            if cached.is_available() {
                return Some((Arc::clone(&cached), Selection::Sticky));
            }
        }

        let nodes = self.nodes.load();
        let chosen = Arc::clone(hashing::select(caller, &nodes)?);

        if self.sticky.len() >= MAX_STICKY_ENTRIES {
            self.sticky.clear();
        }
        self.sticky.insert(caller.to_string(), Arc::clone(&chosen));
        Some((chosen, Selection::Assigned))
    }

    #[cfg(test)]
    pub(crate) fn sticky_len(&self) -> usize {
        self.sticky.len()
    }

    /// Closes every member and forgets all assignments.
    pub fn close(&self) {
        for node in self.nodes.load().iter() {
            node.close();
        }
        self.sticky.clear();
    }
}
