//! The LookupClient seam between the resolver and the policy service

use super::types::{Filter, LookupError};
use crate::graph::Row;
use async_trait::async_trait;

/// Client trait for querying the policy service.
///
/// Abstracts over transport (HTTP, mock) so the resolver doesn't depend on
/// how the service is reached. Retries, if any, belong to the implementation.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Fetch the `fields` of every row in `table` matching `filter`.
    async fn query(&self, table: &str, fields: &[String], filter: &Filter) -> Result<Vec<Row>, LookupError>;
}
