//! JSON wire format for registries
//!
//! A registry travels as a JSON array of flat record objects, in order.
//! Decoding rebuilds the id index from scratch.

use super::node::Record;
use super::registry::{NodeRegistry, RegistryError};
use serde_json::Value;
use thiserror::Error;

/// Errors from encoding or decoding a registry
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Expected a JSON array of records, found {0}")]
    NotAnArray(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Node '{0}' has destination table \"Files\" and would decode as a file")]
    FileShapedNode(String),
}

pub type WireResult<T> = Result<T, WireError>;

/// Encode as compact JSON.
///
/// Fails on a metadata node whose destination table is `"Files"`, since it
/// would come back as a file record.
pub fn encode(registry: &NodeRegistry) -> WireResult<String> {
    check_encodable(registry)?;
    Ok(serde_json::to_string(registry.records())?)
}

pub fn encode_pretty(registry: &NodeRegistry) -> WireResult<String> {
    check_encodable(registry)?;
    Ok(serde_json::to_string_pretty(registry.records())?)
}

pub fn to_value(registry: &NodeRegistry) -> WireResult<Value> {
    check_encodable(registry)?;
    Ok(serde_json::to_value(registry.records())?)
}

fn check_encodable(registry: &NodeRegistry) -> WireResult<()> {
    match registry.meta_nodes().find(|node| node.is_file_shaped()) {
        Some(node) => Err(WireError::FileShapedNode(
            node.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
        )),
        None => Ok(()),
    }
}

pub fn decode(json: &str) -> WireResult<NodeRegistry> {
    from_value(serde_json::from_str(json)?)
}

pub fn from_value(value: Value) -> WireResult<NodeRegistry> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(WireError::NotAnArray(kind_of(&other))),
    };
    let records = items
        .into_iter()
        .map(serde_json::from_value::<Record>)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NodeRegistry::from_records(records)?)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
