//! Reachability and ordering of the nodes a resolution run touches

use super::types::{ResolveError, ResolveResult};
use crate::graph::{NodeId, NodeRegistry, RegistryResult};
use std::collections::{HashMap, HashSet, VecDeque};

/// The order in which nodes reachable from a start node must be resolved.
///
/// Level 0 holds nodes with no non-self dependencies; every other node sits
/// one level above its deepest dependency. Nodes in the same level share no
/// dependency relationship. Within a level, nodes keep registry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    levels: Vec<Vec<NodeId>>,
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done(usize),
}

impl ResolutionPlan {
    /// Walk dependencies from `start`, failing on cycles and dangling edges.
    pub fn build(registry: &NodeRegistry, start: &NodeId) -> ResolveResult<Self> {
        registry.node(start)?;

        let marks = walk(registry, start)?;

        let mut levels: Vec<Vec<NodeId>> = Vec::new();
        for (id, mark) in marks {
            if let Mark::Done(level) = mark {
                if levels.len() <= level {
                    levels.resize_with(level + 1, Vec::new);
                }
                levels[level].push(id);
            }
        }
        for level in &mut levels {
            level.sort_by_key(|id| registry.position(id));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// Every reachable node, dependencies first
    pub fn order(&self) -> impl Iterator<Item = &NodeId> {
        self.levels.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.order().any(|n| n == id)
    }
}

/// A node on the depth-first stack with the dependencies still to visit
struct Frame<'a> {
    id: NodeId,
    upstream: std::vec::IntoIter<&'a NodeId>,
    level: usize,
}

impl<'a> Frame<'a> {
    fn enter(registry: &'a NodeRegistry, id: &NodeId) -> ResolveResult<Self> {
        let node = registry.node(id)?;
        Ok(Self {
            id: id.clone(),
            upstream: node.upstream_ids().collect::<Vec<_>>().into_iter(),
            level: 0,
        })
    }
}

/// Iterative depth-first walk from `start`, marking every reachable node
/// with its level. The frame stack doubles as the path used to name cycles.
fn walk(registry: &NodeRegistry, start: &NodeId) -> ResolveResult<HashMap<NodeId, Mark>> {
    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut stack = vec![Frame::enter(registry, start)?];
    marks.insert(start.clone(), Mark::Visiting);

    while let Some(frame) = stack.last_mut() {
        let Some(source) = frame.upstream.next() else {
            if let Some(done) = stack.pop() {
                marks.insert(done.id, Mark::Done(done.level));
                if let Some(parent) = stack.last_mut() {
                    parent.level = parent.level.max(done.level + 1);
                }
            }
            continue;
        };

        if !registry.contains(source) {
            return Err(ResolveError::UnknownDependency {
                missing: source.clone(),
                referenced_by: frame.id.clone(),
            });
        }
        match marks.get(source) {
            Some(Mark::Done(level)) => frame.level = frame.level.max(level + 1),
            Some(Mark::Visiting) => {
                let from = stack.iter().position(|f| &f.id == source).unwrap_or(0);
                return Err(ResolveError::DependencyCycle(
                    stack[from..].iter().map(|f| f.id.clone()).collect(),
                ));
            }
            None => {
                marks.insert(source.clone(), Mark::Visiting);
                stack.push(Frame::enter(registry, source)?);
            }
        }
    }
    Ok(marks)
}

/// Nodes reachable from a start node, without structural checks
#[derive(Debug, Clone, Default)]
pub struct Reachable {
    /// Reachable node ids in breadth-first order, start first
    pub nodes: Vec<NodeId>,
    /// `(missing, referenced_by)` for every edge to an unknown id
    pub dangling: Vec<(NodeId, NodeId)>,
}

/// Breadth-first walk of non-self dependency edges from `start`.
///
/// Tolerates cycles and dangling edges; only an unknown `start` fails.
pub fn reachable(registry: &NodeRegistry, start: &NodeId) -> RegistryResult<Reachable> {
    registry.node(start)?;

    let mut result = Reachable::default();
    let mut seen: HashSet<&NodeId> = HashSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(id) = queue.pop_front() {
        result.nodes.push(id.clone());
        let Ok(node) = registry.node(id) else {
            continue;
        };
        for source in node.upstream_ids() {
            if !registry.contains(source) {
                result.dangling.push((source.clone(), id.clone()));
            } else if seen.insert(source) {
                queue.push_back(source);
            }
        }
    }
    Ok(result)
}
