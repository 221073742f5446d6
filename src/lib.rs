//! Uploadmeta: dependency-aware upload metadata
//!
//! Prepares the interdependent metadata fields of a scientific-data upload
//! before submission. Each field may depend on the value of another (a
//! directory on a proposal, a proposal on an instrument, an instrument on
//! the logged-on user); the resolver walks those dependencies and asks the
//! policy service for each missing value in order.
//!
//! # Core Concepts
//!
//! - **Nodes**: metadata fields with a lookup table, a value field and
//!   dependencies on other nodes
//! - **Registry**: the ordered record list with an index by node id
//! - **Resolver**: looks up unresolved nodes in dependency order
//! - **Validity**: whether every dependency-bearing node carries a value
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use uploadmeta::{MetaNode, MockLookupClient, NodeRegistry, Resolver};
//!
//! let client = MockLookupClient::new()
//!     .with_rows("proposals", vec![json!({"_id": "1234a", "instrument_id": 54})]);
//! let mut registry = NodeRegistry::from_records(vec![
//!     MetaNode::new("instrument", "instruments").with_value(54).into(),
//!     MetaNode::new("proposal", "proposals")
//!         .depends_on("instrument_id", "instrument")
//!         .with_query_fields(["_id"])
//!         .with_value_field("_id")
//!         .into(),
//! ])
//! .unwrap();
//!
//! let resolver = Resolver::new(Arc::new(client));
//! tokio_test::block_on(resolver.resolve(&mut registry, &"proposal".into())).unwrap();
//! assert!(uploadmeta::is_valid(&registry));
//! ```

pub mod config;
mod graph;
pub mod lookup;
pub mod resolve;

pub use config::{ConfigError, PolicyConfig};
pub use graph::{
    wire, FileNode, MetaNode, NodeId, NodeRegistry, NodeState, Record, RegistryError, RegistryResult, Row,
    WireError, WireResult, FILES_TABLE,
};
pub use lookup::{Filter, HttpLookupClient, LookupClient, LookupError, LookupQuery, MockLookupClient};
pub use resolve::{
    is_valid, is_valid_from, unresolved, unresolved_from, CancellationToken, NodeOutcome, ResolutionPlan, ResolveError,
    ResolveReport, ResolveResult, Resolver,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
