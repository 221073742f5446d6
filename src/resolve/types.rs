//! Resolution errors and reports

use crate::graph::{NodeId, RegistryError};
use crate::lookup::LookupError;
use thiserror::Error;

/// Errors that abort a resolution run
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Nodes that depend on each other through non-self edges, in walk order
    #[error("Dependency cycle: {}", format_cycle(.0))]
    DependencyCycle(Vec<NodeId>),

    #[error("Unknown dependency {missing} referenced by {referenced_by}")]
    UnknownDependency { missing: NodeId, referenced_by: NodeId },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Lookup for {node} failed: {source}")]
    Lookup {
        node: NodeId,
        #[source]
        source: LookupError,
    },

    #[error("Lookup task for {node} did not complete: {reason}")]
    TaskFailed { node: NodeId, reason: String },
}

impl ResolveError {
    /// Structural errors are found before any lookup is issued
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::DependencyCycle(_) | Self::UnknownDependency { .. })
    }
}

fn format_cycle(members: &[NodeId]) -> String {
    let mut names: Vec<&str> = members.iter().map(NodeId::as_str).collect();
    if let Some(first) = members.first() {
        names.push(first.as_str());
    }
    names.join(" -> ")
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// What happened to one node during a resolution run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Lookup returned exactly one row; value set
    Resolved,
    /// Node already had a value; no lookup issued
    Skipped,
    /// Lookup returned no rows
    NoMatch,
    /// Lookup returned more than one row
    Ambiguous,
    /// A dependency had no value, so no lookup was issued
    Blocked,
    /// Cancelled before the lookup was dispatched
    NotStarted,
}

/// Summary of a resolution run.
///
/// Every node reachable from the start appears in `outcomes` exactly once,
/// in processing order.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub outcomes: Vec<(NodeId, NodeOutcome)>,
    /// Number of lookups issued
    pub lookups: usize,
    /// True when the run stopped early on a cancellation request
    pub cancelled: bool,
}

impl ResolveReport {
    pub(crate) fn record(&mut self, id: NodeId, outcome: NodeOutcome) {
        self.outcomes.push((id, outcome));
    }

    pub fn outcome(&self, id: &NodeId) -> Option<NodeOutcome> {
        self.outcomes
            .iter()
            .find(|(node, _)| node == id)
            .map(|(_, outcome)| *outcome)
    }

    /// Ids with the given outcome, in processing order
    pub fn with_outcome(&self, outcome: NodeOutcome) -> Vec<&NodeId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == outcome)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn visited(&self) -> usize {
        self.outcomes.len()
    }
}
