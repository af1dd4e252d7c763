//! Rendezvous (highest random weight) assignment of callers to nodes.
//!
//! Every `(caller, node)` pair gets a pseudo-random weight and the caller goes to the node
//! with the highest weight. Removing a node only moves the callers that were assigned to it;
//! everybody else keeps their node.

use ahash::RandomState;
use std::sync::{Arc, LazyLock};

use crate::node::Node;

static HASHER: LazyLock<RandomState> = LazyLock::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

/// Weight of `node` for `caller`. Stable for the lifetime of the process.
#[inline]
#[must_use]
pub fn weight(caller: &str, node: &str) -> u64 {
    HASHER.hash_one((caller, node))
}

/// Picks the available node with the highest weight for `caller`.
///
/// Ties are broken by node name so the result does not depend on list order.
#[must_use]
pub fn select<'a>(caller: &str, nodes: &'a [Arc<Node>]) -> Option<&'a Arc<Node>> {
    nodes
        .iter()
        .filter(|node| node.is_available())
        .max_by(|a, b| {
            weight(caller, a.name())
                .cmp(&weight(caller, b.name()))
                .then_with(|| b.name().cmp(a.name()))
        })
}
