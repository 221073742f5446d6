//! Lookup request types and errors

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter passed to a lookup: field name -> scalar or array of acceptable values
pub type Filter = BTreeMap<String, Value>;

/// User id sent when no user has been established
pub const ANONYMOUS_USER: i64 = -1;

/// The request body the policy service expects.
///
/// `from` and `where` are the service's field names; they are renamed here
/// and nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupQuery {
    pub user: i64,
    pub columns: Vec<String>,
    #[serde(rename = "from")]
    pub table: String,
    #[serde(rename = "where")]
    pub filter: Filter,
}

impl LookupQuery {
    pub fn new(table: impl Into<String>, columns: &[String], filter: &Filter) -> Self {
        Self {
            user: ANONYMOUS_USER,
            columns: columns.to_vec(),
            table: table.into(),
            filter: filter.clone(),
        }
    }

    pub fn as_user(mut self, user: i64) -> Self {
        self.user = user;
        self
    }
}

/// Errors from the lookup service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("lookup service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("lookup service returned {status}: {body}")]
    ServiceError { status: u16, body: String },
    #[error("lookup response could not be decoded: {0}")]
    Decode(String),
    #[error("unknown user: {0}")]
    UnknownUser(String),
}
