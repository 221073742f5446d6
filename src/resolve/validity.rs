//! Validity checks over a registry
//!
//! Read-only: nothing here issues a lookup.

use super::plan::reachable;
use super::types::ResolveResult;
use crate::graph::{NodeId, NodeRegistry, NodeState};

/// True iff every node that declares dependencies has a value
pub fn is_valid(registry: &NodeRegistry) -> bool {
    registry
        .meta_nodes()
        .filter(|node| node.has_dependencies())
        .all(|node| node.is_resolved())
}

/// True iff `start` and every node reachable from it has a value.
///
/// An edge to an unknown id makes the walk invalid. Fails only when `start`
/// itself is unknown.
pub fn is_valid_from(registry: &NodeRegistry, start: &NodeId) -> ResolveResult<bool> {
    let walk = reachable(registry, start)?;
    if !walk.dangling.is_empty() {
        return Ok(false);
    }
    Ok(walk
        .nodes
        .iter()
        .all(|id| registry.node(id).map(|n| n.is_resolved()).unwrap_or(false)))
}

/// Dependency-bearing nodes without a value, with why, in registry order
pub fn unresolved(registry: &NodeRegistry) -> Vec<(NodeId, NodeState)> {
    registry
        .meta_nodes()
        .filter(|node| node.has_dependencies() && !node.is_resolved())
        .filter_map(|node| Some((node.id.clone()?, node.state())))
        .collect()
}

/// Every node reachable from `start` that lacks a value, in registry order.
///
/// Unlike [`unresolved`], nodes without dependencies are included: an
/// unresolved ancestor blocks `start` whether or not it has dependencies.
pub fn unresolved_from(registry: &NodeRegistry, start: &NodeId) -> ResolveResult<Vec<(NodeId, NodeState)>> {
    let walk = reachable(registry, start)?;
    let mut rows: Vec<(NodeId, NodeState)> = walk
        .nodes
        .into_iter()
        .filter_map(|id| {
            let node = registry.node(&id).ok()?;
            (!node.is_resolved()).then(|| (id, node.state()))
        })
        .collect();
    rows.sort_by_key(|(id, _)| registry.position(id));
    Ok(rows)
}
