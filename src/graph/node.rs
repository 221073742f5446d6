//! Metadata and file records

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single row returned by the lookup service
pub type Row = Map<String, Value>;

/// Identifier of a metadata node (`metaID` on the wire)
///
/// Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create an id from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Why a node does or does not have a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node carries a value
    Resolved,
    /// No lookup has been recorded for the node yet
    Pending,
    /// The last lookup returned no rows
    NoMatch,
    /// The last lookup returned more than one row
    Ambiguous(usize),
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Pending => write!(f, "pending"),
            Self::NoMatch => write!(f, "no match"),
            Self::Ambiguous(n) => write!(f, "ambiguous ({} candidates)", n),
        }
    }
}

/// A metadata field whose value may be looked up from the policy service
///
/// Field names on the wire follow the uploader's record format, including
/// the historical `diplayFormat` spelling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaNode {
    #[serde(rename = "sourceTable")]
    pub source_table: Option<String>,
    #[serde(rename = "destinationTable")]
    pub destination_table: Option<String>,
    #[serde(rename = "metaID")]
    pub id: Option<NodeId>,
    #[serde(rename = "displayType")]
    pub display_type: Option<String>,
    #[serde(rename = "displayTitle")]
    pub display_title: Option<String>,
    /// Filter field name -> id of the node supplying the filter value
    #[serde(rename = "queryDependency")]
    pub dependencies: Option<BTreeMap<String, NodeId>>,
    #[serde(rename = "valueField")]
    pub value_field: Option<String>,
    #[serde(rename = "queryFields")]
    pub query_fields: Option<Vec<String>>,
    #[serde(rename = "diplayFormat")]
    pub display_format: Option<String>,
    pub key: Option<String>,
    /// Resolved value; `None` is the unresolved sentinel
    pub value: Option<Value>,
    #[serde(rename = "directoryOrder")]
    pub directory_order: Option<i64>,
    pub query_results: Option<Vec<Row>>,
}

impl MetaNode {
    /// Create a node with the given id that is looked up from `source_table`
    pub fn new(id: impl Into<NodeId>, source_table: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            source_table: Some(source_table.into()),
            ..Default::default()
        }
    }

    /// Add a dependency: `filter_field` is filled from the value of `source`
    pub fn depends_on(mut self, filter_field: impl Into<String>, source: impl Into<NodeId>) -> Self {
        self.dependencies
            .get_or_insert_with(BTreeMap::new)
            .insert(filter_field.into(), source.into());
        self
    }

    /// Fields requested from the source table
    pub fn with_query_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Row field whose value becomes the node's value
    pub fn with_value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = Some(field.into());
        self
    }

    /// Pre-seed the value (raw user input)
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into()).filter(|v: &Value| !v.is_null());
        self
    }

    /// Set the destination table.
    ///
    /// `"Files"` is reserved for file records; see [`MetaNode::is_file_shaped`].
    pub fn with_destination(mut self, table: impl Into<String>) -> Self {
        self.destination_table = Some(table.into());
        self
    }

    /// Set how the node is presented in the uploader
    pub fn with_display(
        mut self,
        display_type: impl Into<String>,
        title: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        self.display_type = Some(display_type.into());
        self.display_title = Some(title.into());
        self.display_format = Some(format.into());
        self
    }

    /// Position of this node in the upload directory path
    pub fn with_directory_order(mut self, order: i64) -> Self {
        self.directory_order = Some(order);
        self
    }

    /// True when the destination table would make the node decode back as a
    /// file record. The wire encoder refuses such nodes.
    pub fn is_file_shaped(&self) -> bool {
        self.destination_table.as_deref() == Some(FILES_TABLE)
    }

    /// True when the node carries a non-null value
    pub fn is_resolved(&self) -> bool {
        matches!(&self.value, Some(v) if !v.is_null())
    }

    /// True when the node declares at least one dependency
    pub fn has_dependencies(&self) -> bool {
        self.dependencies.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Iterate `(filter_field, source_id)` pairs
    pub fn dependency_edges(&self) -> impl Iterator<Item = (&String, &NodeId)> {
        self.dependencies.iter().flat_map(|d| d.iter())
    }

    /// Ids this node needs resolved before it can be looked up.
    ///
    /// Self-edges are excluded: they read the node's own raw value.
    pub fn upstream_ids(&self) -> impl Iterator<Item = &NodeId> {
        let own = self.id.as_ref();
        self.dependency_edges()
            .map(|(_, source)| source)
            .filter(move |source| Some(*source) != own)
    }

    /// True when `source` names the node itself
    pub fn is_self_edge(&self, source: &NodeId) -> bool {
        self.id.as_ref() == Some(source)
    }

    /// Resolution state derived from the value and the last lookup rows
    pub fn state(&self) -> NodeState {
        if self.is_resolved() {
            return NodeState::Resolved;
        }
        match &self.query_results {
            None => NodeState::Pending,
            Some(rows) if rows.is_empty() => NodeState::NoMatch,
            Some(rows) if rows.len() > 1 => NodeState::Ambiguous(rows.len()),
            // A single row without the value field is as good as no match
            Some(_) => NodeState::NoMatch,
        }
    }

    /// Expand `%(field)s` placeholders of the display format against `row`.
    ///
    /// Missing fields render as empty strings; string values render without
    /// quotes. Returns `None` when the node has no display format.
    pub fn render_display(&self, row: &Row) -> Option<String> {
        let format = self.display_format.as_deref()?;
        let mut out = String::with_capacity(format.len());
        let mut rest = format;
        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(")s") {
                Some(end) => {
                    let field = &after[..end];
                    out.push_str(&scalar_text(row.get(field)));
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        Some(out)
    }

    /// Display text for a resolved node backed by a single lookup row
    pub fn display_text(&self) -> Option<String> {
        match self.query_results.as_deref() {
            Some([row]) if self.is_resolved() => self.render_display(row),
            _ => None,
        }
    }
}

/// Render a JSON scalar the way it is shown to users
pub(crate) fn scalar_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Destination table that marks a record as a file
pub const FILES_TABLE: &str = "Files";

/// A file being uploaded alongside the metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    #[serde(rename = "destinationTable")]
    pub destination_table: Option<String>,
    pub name: Option<String>,
    pub subdir: Option<String>,
    pub size: Option<u64>,
    pub hashtype: Option<String>,
    pub hashsum: Option<String>,
    pub mimetype: Option<String>,
    #[serde(default, with = "timestamp")]
    pub ctime: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub mtime: Option<DateTime<Utc>>,
}

/// File timestamps: RFC 3339, zone-less ISO 8601 (taken as UTC), or Unix
/// seconds. Always written back as RFC 3339.
mod timestamp {
    use super::*;
    use serde::de::Error;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => parse(&text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", text))),
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(from_epoch)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", n))),
            Some(other) => Err(D::Error::custom(format!("invalid timestamp {}", other))),
        }
    }

    pub(crate) fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(zoned) = DateTime::parse_from_rfc3339(text) {
            return Some(zoned.with_timezone(&Utc));
        }
        text.parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9) as u32;
        Utc.timestamp_opt(whole as i64, nanos).single()
    }
}

impl Default for FileNode {
    fn default() -> Self {
        Self {
            destination_table: Some(FILES_TABLE.to_string()),
            name: None,
            subdir: None,
            size: None,
            hashtype: None,
            hashsum: None,
            mimetype: None,
            ctime: None,
            mtime: None,
        }
    }
}

impl FileNode {
    /// Create a file record with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Subdirectory of the upload the file lands in
    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    /// Set the hash algorithm and digest
    pub fn with_hash(mut self, hashtype: impl Into<String>, hashsum: impl Into<String>) -> Self {
        self.hashtype = Some(hashtype.into());
        self.hashsum = Some(hashsum.into());
        self
    }

    /// Set the file size in bytes
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// One entry in a registry: either a metadata node or a file
///
/// On decode, an object whose `destinationTable` is `"Files"` is a file;
/// anything else is a metadata node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Meta(MetaNode),
    File(FileNode),
}

impl Record {
    /// Identifier of the record, if it is an indexable metadata node
    pub fn id(&self) -> Option<&NodeId> {
        match self {
            Self::Meta(node) => node.id.as_ref(),
            Self::File(_) => None,
        }
    }

    /// The metadata node, if this is one
    pub fn as_meta(&self) -> Option<&MetaNode> {
        match self {
            Self::Meta(node) => Some(node),
            Self::File(_) => None,
        }
    }

    /// Mutable access to the metadata node, if this is one
    pub fn as_meta_mut(&mut self) -> Option<&mut MetaNode> {
        match self {
            Self::Meta(node) => Some(node),
            Self::File(_) => None,
        }
    }

    /// The file record, if this is one
    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Self::File(file) => Some(file),
            Self::Meta(_) => None,
        }
    }
}

impl From<MetaNode> for Record {
    fn from(node: MetaNode) -> Self {
        Self::Meta(node)
    }
}

impl From<FileNode> for Record {
    fn from(file: FileNode) -> Self {
        Self::File(file)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let object = Map::<String, Value>::deserialize(deserializer)?;
        let is_file = object.get("destinationTable").and_then(Value::as_str) == Some(FILES_TABLE);
        let value = Value::Object(object);
        if is_file {
            FileNode::deserialize(value).map(Record::File).map_err(D::Error::custom)
        } else {
            MetaNode::deserialize(value).map(Record::Meta).map_err(D::Error::custom)
        }
    }
}
