//! NodeRegistry: ordered records with an index by node id

use super::node::{scalar_text, MetaNode, NodeId, Record};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from registry access and mutation
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Duplicate node identifier: {0}")]
    DuplicateIdentifier(NodeId),

    #[error("Position {index} out of range for registry of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// An ordered collection of records with O(1) lookup by node id.
///
/// Every mutation keeps `index` pointing at the current position of each
/// identified node. Records without an id (files, anonymous nodes) are only
/// reachable by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRegistry {
    records: Vec<Record>,
    index: HashMap<NodeId, usize>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from records in order, indexing every node id
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> RegistryResult<Self> {
        let mut registry = Self::new();
        registry.extend(records)?;
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Iterate metadata nodes in registry order, skipping files
    pub fn meta_nodes(&self) -> impl Iterator<Item = &MetaNode> {
        self.records.iter().filter_map(Record::as_meta)
    }

    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Ids currently indexed, in no particular order
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.index.keys()
    }

    /// Look up a metadata node by id
    pub fn node(&self, id: &NodeId) -> RegistryResult<&MetaNode> {
        self.position(id)
            .and_then(|pos| self.records[pos].as_meta())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    pub fn node_mut(&mut self, id: &NodeId) -> RegistryResult<&mut MetaNode> {
        match self.position(id) {
            Some(pos) => self.records[pos]
                .as_meta_mut()
                .ok_or_else(|| RegistryError::NotFound(id.clone())),
            None => Err(RegistryError::NotFound(id.clone())),
        }
    }

    /// Append a record at the end
    pub fn push(&mut self, record: impl Into<Record>) -> RegistryResult<()> {
        let record = record.into();
        self.check_unique(&record, None)?;
        if let Some(id) = record.id() {
            self.index.insert(id.clone(), self.records.len());
        }
        self.records.push(record);
        Ok(())
    }

    /// Append every record; stops at the first duplicate, keeping earlier ones
    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) -> RegistryResult<()> {
        for record in records {
            self.push(record)?;
        }
        Ok(())
    }

    /// Insert a record at `position`, shifting later records right
    pub fn insert(&mut self, position: usize, record: impl Into<Record>) -> RegistryResult<()> {
        let record = record.into();
        if position > self.records.len() {
            return Err(RegistryError::IndexOutOfRange {
                index: position,
                len: self.records.len(),
            });
        }
        self.check_unique(&record, None)?;
        for pos in self.index.values_mut() {
            if *pos >= position {
                *pos += 1;
            }
        }
        if let Some(id) = record.id() {
            self.index.insert(id.clone(), position);
        }
        self.records.insert(position, record);
        Ok(())
    }

    /// Remove and return the record at `position`
    pub fn remove(&mut self, position: usize) -> RegistryResult<Record> {
        if position >= self.records.len() {
            return Err(RegistryError::IndexOutOfRange {
                index: position,
                len: self.records.len(),
            });
        }
        let record = self.records.remove(position);
        if let Some(id) = record.id() {
            self.index.remove(id);
        }
        for pos in self.index.values_mut() {
            if *pos > position {
                *pos -= 1;
            }
        }
        Ok(record)
    }

    /// Remove and return the node with the given id
    pub fn remove_node(&mut self, id: &NodeId) -> RegistryResult<Record> {
        let position = self
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        self.remove(position)
    }

    /// Remove and return the last record
    pub fn pop(&mut self) -> Option<Record> {
        let last = self.records.len().checked_sub(1)?;
        self.remove(last).ok()
    }

    /// Replace the record at `position`, returning the old one
    pub fn replace(&mut self, position: usize, record: impl Into<Record>) -> RegistryResult<Record> {
        let record = record.into();
        if position >= self.records.len() {
            return Err(RegistryError::IndexOutOfRange {
                index: position,
                len: self.records.len(),
            });
        }
        self.check_unique(&record, Some(position))?;
        let old = std::mem::replace(&mut self.records[position], record);
        if let Some(id) = old.id() {
            self.index.remove(id);
        }
        if let Some(id) = self.records[position].id() {
            self.index.insert(id.clone(), position);
        }
        Ok(old)
    }

    /// Replace the node with the given id in place
    pub fn replace_node(&mut self, id: &NodeId, record: impl Into<Record>) -> RegistryResult<Record> {
        let position = self
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        self.replace(position, record)
    }

    /// Join the display text of resolved directory nodes into a relative path.
    ///
    /// Nodes with `displayType == "directoryTree"` contribute one path segment
    /// each, ordered by `directoryOrder`. Unresolved nodes are skipped.
    pub fn directory_path(&self) -> String {
        let mut segments: Vec<(i64, String)> = self
            .meta_nodes()
            .filter(|node| node.display_type.as_deref() == Some("directoryTree"))
            .filter_map(|node| {
                let text = node
                    .display_text()
                    .or_else(|| node.is_resolved().then(|| scalar_text(node.value.as_ref())))?;
                Some((node.directory_order.unwrap_or(i64::MAX), text))
            })
            .collect();
        segments.sort_by_key(|(order, _)| *order);
        segments
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn check_unique(&self, record: &Record, replacing: Option<usize>) -> RegistryResult<()> {
        if let Some(id) = record.id() {
            if let Some(existing) = self.position(id) {
                if Some(existing) != replacing {
                    return Err(RegistryError::DuplicateIdentifier(id.clone()));
                }
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a NodeRegistry {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
