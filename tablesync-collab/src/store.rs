//! Operation storage port

use crate::operation::Operation;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tablesync_id::{SnowflakeId, StoreError};

/// Append-only operation storage.
///
/// Implement this trait to back the log with a database or a shared cache.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Append an operation. Returns `false` if an operation with the same id
    /// is already stored; the store is left unchanged in that case.
    async fn append(&self, operation: &Operation) -> Result<bool, StoreError>;

    /// Every operation for a row, in any order
    async fn load_row(&self, row_id: &str) -> Result<Vec<Operation>, StoreError>;

    /// Every row with at least one operation
    async fn row_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory operation store (for testing/development)
#[derive(Clone, Default)]
pub struct InMemoryOperationStore {
    rows: Arc<DashMap<String, Vec<Operation>>>,
    ids: Arc<DashSet<SnowflakeId>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored operations
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All operations across rows (for testing)
    pub fn all_operations(&self) -> Vec<Operation> {
        self.rows
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn append(&self, operation: &Operation) -> Result<bool, StoreError> {
        if !self.ids.insert(operation.id) {
            return Ok(false);
        }
        self.rows
            .entry(operation.row_id.clone())
            .or_default()
            .push(operation.clone());
        Ok(true)
    }

    async fn load_row(&self, row_id: &str) -> Result<Vec<Operation>, StoreError> {
        Ok(self
            .rows
            .get(row_id)
            .map(|ops| ops.value().clone())
            .unwrap_or_default())
    }

    async fn row_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rows.iter().map(|entry| entry.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::vector_clock::VectorClock;

    fn op(raw: u64, row: &str) -> Operation {
        Operation {
            id: SnowflakeId::from_raw(raw),
            kind: OperationKind::Insert,
            row_id: row.into(),
            field_id: None,
            value: None,
            clock: VectorClock::new().increment(0),
            author_id: "alice".into(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let store = InMemoryOperationStore::new();
        assert!(store.append(&op(1, "r1")).await.unwrap());
        assert!(!store.append(&op(1, "r1")).await.unwrap());
        assert!(store.append(&op(2, "r1")).await.unwrap());

        assert_eq!(store.len(), 2);
        assert_eq!(store.load_row("r1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rows_are_separate() {
        let store = InMemoryOperationStore::new();
        store.append(&op(1, "r1")).await.unwrap();
        store.append(&op(2, "r2")).await.unwrap();

        let mut rows = store.row_ids().await.unwrap();
        rows.sort();
        assert_eq!(rows, vec!["r1".to_string(), "r2".to_string()]);
        assert!(store.load_row("missing").await.unwrap().is_empty());
    }
}
