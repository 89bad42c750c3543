//! Operations: the immutable entries of the log

use crate::vector_clock::VectorClock;
use crate::{CollabError, CollabResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tablesync_id::SnowflakeId;

/// What an operation does to its row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Insert and Update write field values; Delete does not.
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A cell value.
///
/// Serialized as the bare JSON scalar; objects and arrays are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    fn is_finite(&self) -> bool {
        match self {
            FieldValue::Number(n) => n.is_finite(),
            _ => true,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Number(f64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Number(v as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// A stamped, immutable edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: SnowflakeId,
    pub kind: OperationKind,
    pub row_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    pub clock: VectorClock,
    pub author_id: String,
    /// Wall-clock milliseconds decoded from `id`
    pub timestamp: i64,
}

impl Operation {
    /// Node that issued the id.
    pub fn node_id(&self) -> u16 {
        self.id.node_id()
    }

    /// The field this operation writes, if any.
    pub fn written_field(&self) -> Option<(&str, &FieldValue)> {
        if !self.kind.is_write() {
            return None;
        }
        match (&self.field_id, &self.value) {
            (Some(field), Some(value)) => Some((field.as_str(), value)),
            _ => None,
        }
    }

    /// Structural checks shared by local drafts and replicated operations.
    pub fn validate_shape(&self) -> CollabResult<()> {
        check_shape(
            self.kind,
            &self.row_id,
            self.field_id.as_deref(),
            self.value.as_ref(),
            &self.author_id,
        )
    }
}

/// An edit as submitted by a client, before it has an id or a clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDraft {
    pub kind: OperationKind,
    pub row_id: String,
    #[serde(default)]
    pub field_id: Option<String>,
    #[serde(default)]
    pub value: Option<FieldValue>,
    pub author_id: String,
    /// The row clock the client last saw. Absent means "everything this
    /// node has seen".
    #[serde(default)]
    pub observed_clock: Option<VectorClock>,
}

impl OperationDraft {
    pub fn insert(row_id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Insert,
            row_id: row_id.into(),
            field_id: None,
            value: None,
            author_id: author_id.into(),
            observed_clock: None,
        }
    }

    pub fn update(
        row_id: impl Into<String>,
        field_id: impl Into<String>,
        value: impl Into<FieldValue>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            row_id: row_id.into(),
            field_id: Some(field_id.into()),
            value: Some(value.into()),
            author_id: author_id.into(),
            observed_clock: None,
        }
    }

    pub fn delete(row_id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            row_id: row_id.into(),
            field_id: None,
            value: None,
            author_id: author_id.into(),
            observed_clock: None,
        }
    }

    /// Insert with an initial field value.
    pub fn with_field(mut self, field_id: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.field_id = Some(field_id.into());
        self.value = Some(value.into());
        self
    }

    /// Stamp against the clock the client observed instead of the node's.
    pub fn observed(mut self, clock: VectorClock) -> Self {
        self.observed_clock = Some(clock);
        self
    }

    pub fn validate_shape(&self) -> CollabResult<()> {
        check_shape(
            self.kind,
            &self.row_id,
            self.field_id.as_deref(),
            self.value.as_ref(),
            &self.author_id,
        )
    }
}

fn check_shape(
    kind: OperationKind,
    row_id: &str,
    field_id: Option<&str>,
    value: Option<&FieldValue>,
    author_id: &str,
) -> CollabResult<()> {
    let invalid = |reason: String| Err(CollabError::InvalidOperation(reason));

    if row_id.is_empty() {
        return invalid("row_id is empty".into());
    }
    if author_id.is_empty() {
        return invalid(format!("{} on {} has no author", kind, row_id));
    }
    if field_id.is_some_and(str::is_empty) {
        return invalid(format!("{} on {} has an empty field_id", kind, row_id));
    }
    if value.is_some_and(|v| !v.is_finite()) {
        return invalid(format!("{} on {} carries a non-finite number", kind, row_id));
    }

    match kind {
        OperationKind::Insert if field_id.is_some() != value.is_some() => invalid(format!(
            "insert on {} must carry both field_id and value or neither",
            row_id
        )),
        OperationKind::Update if field_id.is_none() || value.is_none() => {
            invalid(format!("update on {} requires field_id and value", row_id))
        }
        OperationKind::Delete if field_id.is_some() || value.is_some() => {
            invalid(format!("delete on {} must not carry a field or value", row_id))
        }
        _ => Ok(()),
    }
}
