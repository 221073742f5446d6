//! In-memory lookup client for tests and offline runs

use super::client::LookupClient;
use super::types::{Filter, LookupError};
use crate::graph::Row;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A query the mock received
#[derive(Debug, Clone, PartialEq)]
pub struct LookupCall {
    pub table: String,
    pub fields: Vec<String>,
    pub filter: Filter,
}

/// Mock client that answers from preloaded tables.
///
/// A row matches when every filter entry matches the row's field: equal
/// values, the filter listing the row's value, or the row's array field
/// containing the filter value. Matching rows are projected onto the
/// requested fields.
#[derive(Debug, Default)]
pub struct MockLookupClient {
    tables: HashMap<String, Vec<Row>>,
    failures: HashMap<String, LookupError>,
    unavailable: bool,
    calls: Mutex<Vec<LookupCall>>,
}

impl MockLookupClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every query fails with `ServiceUnavailable`
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    /// Add rows to `table`; non-object values are ignored
    pub fn with_rows(mut self, table: impl Into<String>, rows: impl IntoIterator<Item = Value>) -> Self {
        self.tables
            .entry(table.into())
            .or_default()
            .extend(rows.into_iter().filter_map(|row| match row {
                Value::Object(row) => Some(row),
                _ => None,
            }));
        self
    }

    /// Make every query against `table` fail with `error`
    pub fn with_failure(mut self, table: impl Into<String>, error: LookupError) -> Self {
        self.failures.insert(table.into(), error);
        self
    }

    /// Queries received so far, in arrival order
    pub fn calls(&self) -> Vec<LookupCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    fn record(&self, table: &str, fields: &[String], filter: &Filter) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(LookupCall {
                table: table.to_string(),
                fields: fields.to_vec(),
                filter: filter.clone(),
            });
        }
    }
}

#[async_trait]
impl LookupClient for MockLookupClient {
    async fn query(&self, table: &str, fields: &[String], filter: &Filter) -> Result<Vec<Row>, LookupError> {
        self.record(table, fields, filter);

        if self.unavailable {
            return Err(LookupError::ServiceUnavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }
        if let Some(error) = self.failures.get(table) {
            return Err(error.clone());
        }

        let rows = self.tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|row| row_matches(row, filter))
            .map(|row| project(row, fields))
            .collect())
    }
}

fn row_matches(row: &Row, filter: &Filter) -> bool {
    filter.iter().all(|(field, wanted)| match row.get(field) {
        Some(actual) => value_matches(actual, wanted),
        None => false,
    })
}

fn value_matches(actual: &Value, wanted: &Value) -> bool {
    if loosely_equal(actual, wanted) {
        return true;
    }
    match (actual, wanted) {
        (_, Value::Array(options)) => options.iter().any(|o| loosely_equal(actual, o)),
        (Value::Array(items), _) => items.iter().any(|i| loosely_equal(i, wanted)),
        _ => false,
    }
}

/// Equality that treats `54` and `"54"` as the same key
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => a == b,
    }
}

fn project(row: &Row, fields: &[String]) -> Row {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}
