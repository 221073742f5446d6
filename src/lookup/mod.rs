//! Lookup client for the policy service
//!
//! Two implementations of [`LookupClient`]:
//! - `HttpLookupClient`: posts JSON queries to the service (production)
//! - `MockLookupClient`: answers from in-memory tables (testing)

mod client;
mod http;
mod mock;
mod types;

pub use client::LookupClient;
pub use http::HttpLookupClient;
pub use mock::{LookupCall, MockLookupClient};
pub use types::{Filter, LookupError, LookupQuery, ANONYMOUS_USER};
