//! Derived row state and conflict records

use crate::operation::FieldValue;
use crate::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tablesync_id::SnowflakeId;

/// A row as reconstructed from its operations.
///
/// Rows are a cache: replaying the log always yields the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Number of field writes that survive deletes
    pub version: u32,
    pub clock: VectorClock,
    pub tombstone: bool,
}

impl Row {
    /// A row no operation has touched.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
            version: 0,
            clock: VectorClock::new(),
            tombstone: false,
        }
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldValue> {
        self.fields.get(field_id)
    }

    pub fn is_live(&self) -> bool {
        !self.tombstone
    }
}

/// Concurrent writes to one field that set different values.
///
/// Purely informational: every losing operation stays in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    pub row_id: String,
    pub field_id: String,
    pub winning_operation_id: SnowflakeId,
    /// Ascending
    pub losing_operation_ids: Vec<SnowflakeId>,
}

/// Output of a resolution pass over one or more rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Sorted by row id
    pub rows: Vec<Row>,
    /// Sorted by row id, then field id
    pub conflicts: Vec<Conflict>,
}

impl Resolution {
    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn conflicts_for<'a>(&'a self, row_id: &'a str) -> impl Iterator<Item = &'a Conflict> + 'a {
        self.conflicts.iter().filter(move |c| c.row_id == row_id)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
