//! Dependency resolution and validity checking
//!
//! A resolution run plans the nodes reachable from a start node, then looks
//! up each unresolved one once its dependencies carry values. The validity
//! checker reports whether the result is submittable.

mod plan;
mod resolver;
mod types;
mod validity;

pub use plan::{reachable, Reachable, ResolutionPlan};
pub use resolver::Resolver;
pub use types::{NodeOutcome, ResolveError, ResolveReport, ResolveResult};
pub use tokio_util::sync::CancellationToken;
pub use validity::{is_valid, is_valid_from, unresolved, unresolved_from};
