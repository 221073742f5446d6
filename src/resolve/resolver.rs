//! Resolver: looks up unresolved nodes in dependency order

use super::plan::ResolutionPlan;
use super::types::{NodeOutcome, ResolveError, ResolveReport, ResolveResult};
use crate::graph::{MetaNode, NodeId, NodeRegistry, Row};
use crate::lookup::{Filter, LookupClient, LookupError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A lookup ready to be issued for one node
#[derive(Debug, Clone)]
struct LookupJob {
    id: NodeId,
    table: String,
    fields: Vec<String>,
    filter: Filter,
}

/// How a dispatched lookup ended
enum Dispatch {
    Done(Result<Vec<Row>, LookupError>),
    Cancelled,
    Failed(String),
}

/// Resolves metadata nodes against a lookup client.
///
/// Nodes are processed level by level (see [`ResolutionPlan`]). Lookups
/// within a level are independent and may run concurrently up to the
/// configured limit; levels never overlap. The resolver keeps no state
/// between runs beyond what it writes onto the nodes.
pub struct Resolver {
    client: Arc<dyn LookupClient>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Resolver {
    /// Create a resolver issuing one lookup at a time through `client`
    pub fn new(client: Arc<dyn LookupClient>) -> Self {
        Self {
            client,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// Allow up to `limit` lookups in flight at once (minimum 1)
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Stop dispatching lookups once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token that stops this resolver; clone it to cancel from elsewhere
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve `start` and every node it depends on.
    ///
    /// Structural problems (cycles, unknown dependencies) fail before any
    /// lookup. A lookup failure aborts the run; values written earlier in the
    /// run, including other lookups of the same level, are kept. Empty and
    /// multi-row results are not errors: the node stays unresolved with the
    /// rows recorded in `query_results`.
    #[tracing::instrument(skip(self, registry, start), fields(start = %start))]
    pub async fn resolve(&self, registry: &mut NodeRegistry, start: &NodeId) -> ResolveResult<ResolveReport> {
        let plan = ResolutionPlan::build(registry, start)?;
        debug!(nodes = plan.len(), levels = plan.levels().len(), "resolution planned");

        let mut report = ResolveReport::default();
        for (depth, level) in plan.levels().iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                record_not_started(registry, &plan.levels()[depth..], &mut report)?;
                break;
            }

            let mut jobs = Vec::new();
            for id in level {
                let node = registry.node(id)?;
                if node.is_resolved() {
                    report.record(id.clone(), NodeOutcome::Skipped);
                    continue;
                }
                match prepare(registry, node) {
                    Some(job) => jobs.push(job),
                    None => {
                        debug!(node = %id, "dependency unresolved, lookup not issued");
                        report.record(id.clone(), NodeOutcome::Blocked);
                    }
                }
            }

            let dispatched = if self.concurrency == 1 || jobs.len() < 2 {
                self.run_sequential(&jobs).await
            } else {
                self.run_concurrent(&jobs).await
            };

            let mut failure = None;
            for (job, dispatch) in jobs.into_iter().zip(dispatched) {
                match dispatch {
                    Dispatch::Done(Ok(rows)) => {
                        report.lookups += 1;
                        let outcome = apply(registry.node_mut(&job.id)?, rows);
                        report.record(job.id, outcome);
                    }
                    Dispatch::Done(Err(source)) => {
                        report.lookups += 1;
                        warn!(node = %job.id, error = %source, "lookup failed");
                        failure.get_or_insert(ResolveError::Lookup { node: job.id, source });
                    }
                    Dispatch::Failed(reason) => {
                        failure.get_or_insert(ResolveError::TaskFailed { node: job.id, reason });
                    }
                    Dispatch::Cancelled => {
                        report.cancelled = true;
                        report.record(job.id, NodeOutcome::NotStarted);
                    }
                }
            }

            if let Some(err) = failure {
                return Err(err);
            }
            if report.cancelled {
                record_not_started(registry, &plan.levels()[depth + 1..], &mut report)?;
                break;
            }
        }

        if report.cancelled {
            warn!(lookups = report.lookups, "resolution cancelled");
        } else {
            info!(
                visited = report.visited(),
                lookups = report.lookups,
                resolved = registry.node(start)?.is_resolved(),
                "resolution finished"
            );
        }
        Ok(report)
    }

    async fn run_sequential(&self, jobs: &[LookupJob]) -> Vec<Dispatch> {
        let mut out = Vec::with_capacity(jobs.len());
        let mut failed = false;
        for job in jobs {
            if failed || self.cancel.is_cancelled() {
                out.push(Dispatch::Cancelled);
                continue;
            }
            debug!(node = %job.id, table = %job.table, "lookup");
            let result = self.client.query(&job.table, &job.fields, &job.filter).await;
            failed = result.is_err();
            out.push(Dispatch::Done(result));
        }
        out
    }

    async fn run_concurrent(&self, jobs: &[LookupJob]) -> Vec<Dispatch> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for (slot, job) in jobs.iter().cloned().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (slot, Dispatch::Cancelled),
                    permit = semaphore.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return (slot, Dispatch::Cancelled);
                };
                if cancel.is_cancelled() {
                    return (slot, Dispatch::Cancelled);
                }
                debug!(node = %job.id, table = %job.table, "lookup");
                let result = client.query(&job.table, &job.fields, &job.filter).await;
                (slot, Dispatch::Done(result))
            });
        }

        let mut slots: Vec<Option<Dispatch>> = (0..jobs.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, dispatch)) => slots[slot] = Some(dispatch),
                Err(e) => warn!(error = %e, "lookup task failed"),
            }
        }
        slots
            .into_iter()
            .map(|d| d.unwrap_or_else(|| Dispatch::Failed("lookup task panicked or was aborted".to_string())))
            .collect()
    }
}

/// Build the lookup for an unresolved node, or `None` if it cannot be issued
/// because a dependency (or the node's own seed, for a self-edge) has no value.
fn prepare(registry: &NodeRegistry, node: &MetaNode) -> Option<LookupJob> {
    let id = node.id.clone()?;
    let Some(table) = node.source_table.clone() else {
        warn!(node = %id, "node has no source table");
        return None;
    };

    let mut filter = Filter::new();
    for (field, source) in node.dependency_edges() {
        let supplier = if node.is_self_edge(source) {
            node
        } else {
            registry.node(source).ok()?
        };
        if !supplier.is_resolved() {
            return None;
        }
        filter.insert(field.clone(), supplier.value.clone()?);
    }

    Some(LookupJob {
        id,
        table,
        fields: node.query_fields.clone().unwrap_or_default(),
        filter,
    })
}

/// Record lookup rows on the node and pick its value when exactly one row
/// carries the value field.
fn apply(node: &mut MetaNode, rows: Vec<Row>) -> NodeOutcome {
    let picked = match rows.as_slice() {
        [row] => node
            .value_field
            .as_deref()
            .and_then(|field| row.get(field))
            .filter(|v| !v.is_null())
            .cloned(),
        _ => None,
    };
    let count = rows.len();
    node.query_results = Some(rows);

    let id = node.id.as_ref().map(NodeId::as_str).unwrap_or_default();
    match (count, picked) {
        (1, Some(value)) => {
            debug!(node = id, value = %value, "resolved");
            node.value = Some(value);
            NodeOutcome::Resolved
        }
        (0 | 1, _) => {
            warn!(node = id, "lookup matched nothing usable");
            NodeOutcome::NoMatch
        }
        (n, _) => {
            warn!(node = id, candidates = n, "lookup ambiguous");
            NodeOutcome::Ambiguous
        }
    }
}

fn record_not_started(
    registry: &NodeRegistry,
    levels: &[Vec<NodeId>],
    report: &mut ResolveReport,
) -> ResolveResult<()> {
    for id in levels.iter().flatten() {
        let outcome = if registry.node(id)?.is_resolved() {
            NodeOutcome::Skipped
        } else {
            NodeOutcome::NotStarted
        };
        report.record(id.clone(), outcome);
    }
    Ok(())
}
