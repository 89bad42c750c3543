//! Append-only operation log
//!
//! Stamps drafts with a Snowflake id and a per-row vector clock, validates
//! them against what this node knows of the row, and persists them through
//! an [`OperationStore`].
//!
//! Each row has a cached [`RowHead`] in a `DashMap`. Holding the entry
//! serializes clock computation for that row; store I/O happens after the
//! entry guard is dropped.

use crate::operation::{Operation, OperationDraft, OperationKind};
use crate::store::OperationStore;
use crate::vector_clock::VectorClock;
use crate::{CollabError, CollabResult};
use dashmap::DashMap;
use std::sync::Arc;
use tablesync_id::IdGenerator;
use tablesync_log::{debug, trace, warn};

/// What this node knows about a row without replaying its log.
#[derive(Debug, Clone, Default)]
struct RowHead {
    clock: VectorClock,
    inserted: bool,
    /// Clocks of writes not followed by another write
    write_frontier: Vec<VectorClock>,
    /// Clocks of deletes not followed by any write
    open_deletes: Vec<VectorClock>,
}

impl RowHead {
    fn from_operations(operations: &[Operation]) -> Self {
        let mut head = Self::default();
        for op in operations {
            head.observe(op);
        }
        head
    }

    fn observe(&mut self, op: &Operation) {
        self.clock.merge_from(&op.clock);

        if op.kind == OperationKind::Delete {
            let followed = self.write_frontier.iter().any(|w| op.clock.happens_before(w));
            if !followed && !self.open_deletes.contains(&op.clock) {
                self.open_deletes.push(op.clock.clone());
            }
            return;
        }

        if op.kind == OperationKind::Insert {
            self.inserted = true;
        }
        self.open_deletes.retain(|d| !d.happens_before(&op.clock));

        let superseded = self
            .write_frontier
            .iter()
            .any(|w| *w == op.clock || op.clock.happens_before(w));
        if !superseded {
            self.write_frontier.retain(|w| !w.happens_before(&op.clock));
            self.write_frontier.push(op.clock.clone());
        }
    }

    /// Inserted and not currently deleted
    fn is_live(&self) -> bool {
        self.inserted && self.open_deletes.is_empty()
    }

    fn check(&self, draft: &OperationDraft) -> CollabResult<()> {
        match draft.kind {
            OperationKind::Insert if self.is_live() => Err(CollabError::InvalidOperation(format!(
                "insert on live row {}",
                draft.row_id
            ))),
            OperationKind::Update | OperationKind::Delete if !self.inserted => {
                Err(CollabError::InvalidOperation(format!(
                    "{} on row {} before any insert",
                    draft.kind, draft.row_id
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Operation log for one node.
pub struct OperationLog {
    store: Arc<dyn OperationStore>,
    generator: Arc<IdGenerator>,
    heads: DashMap<String, RowHead>,
}

impl OperationLog {
    pub fn new(store: Arc<dyn OperationStore>, generator: Arc<IdGenerator>) -> Self {
        Self {
            store,
            generator,
            heads: DashMap::new(),
        }
    }

    pub fn generator(&self) -> &Arc<IdGenerator> {
        &self.generator
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Validate, stamp and persist a local edit.
    ///
    /// The clock is `(observed_clock or row clock).increment(node_id)`,
    /// except that this node's own counter never goes backwards: a stale
    /// observed clock still gets the next counter after the row head's. A
    /// rejected draft leaves the log untouched.
    pub async fn append(&self, draft: OperationDraft) -> CollabResult<Operation> {
        draft.validate_shape()?;
        self.hydrate(&draft.row_id).await?;

        let operation = {
            let mut head = self
                .heads
                .entry(draft.row_id.clone())
                .or_default();
            head.check(&draft)?;

            let id = self.generator.next_id()?;
            let node = self.generator.node_id();
            let clock = match draft.observed_clock.as_ref() {
                // other nodes' entries come from the client, our own
                // counter always continues from the row head
                Some(observed) => {
                    let mut clock = observed.clone();
                    clock.advance_to(node, head.clock.get(node));
                    clock.increment(node)
                }
                None => head.clock.increment(node),
            };

            let operation = Operation {
                id,
                kind: draft.kind,
                timestamp: self.generator.parse_id(id).timestamp_ms,
                row_id: draft.row_id,
                field_id: draft.field_id,
                value: draft.value,
                clock,
                author_id: draft.author_id,
            };
            head.observe(&operation);
            operation
        };

        if let Err(err) = self.store.append(&operation).await {
            warn!("Failed to persist {} on {}: {}", operation.id, operation.row_id, err);
            // the cached head has seen an operation the store never got
            self.heads.remove(&operation.row_id);
            return Err(err.into());
        }

        debug!(
            "Appended {} {} on {} by {}",
            operation.kind, operation.id, operation.row_id, operation.author_id
        );
        Ok(operation)
    }

    /// Accept an operation stamped elsewhere.
    ///
    /// Idempotent by id: returns `false` when the operation was already in
    /// the log. Causal preconditions are not checked since replicated
    /// operations may arrive out of order.
    pub async fn ingest(&self, operation: Operation) -> CollabResult<bool> {
        operation.validate_shape()?;
        self.hydrate(&operation.row_id).await?;

        let stored = self.store.append(&operation).await?;
        if stored {
            self.heads
                .entry(operation.row_id.clone())
                .or_default()
                .observe(&operation);
            trace!("Ingested {} on {} from node {}", operation.id, operation.row_id, operation.node_id());
        }
        Ok(stored)
    }

    /// Every operation for `row_id`, ordered by id.
    pub async fn operations_for(&self, row_id: &str) -> CollabResult<Vec<Operation>> {
        let mut operations = self.store.load_row(row_id).await?;
        operations.sort_by_key(|op| op.id);
        operations.dedup_by_key(|op| op.id);
        Ok(operations)
    }

    /// Rows with at least one operation, sorted.
    pub async fn row_ids(&self) -> CollabResult<Vec<String>> {
        let mut rows = self.store.row_ids().await?;
        rows.sort_unstable();
        rows.dedup();
        Ok(rows)
    }

    /// Merge of every clock this node has seen for `row_id`.
    pub async fn row_clock(&self, row_id: &str) -> CollabResult<VectorClock> {
        self.hydrate(row_id).await?;
        Ok(self
            .heads
            .get(row_id)
            .map(|head| head.clock.clone())
            .unwrap_or_default())
    }

    async fn hydrate(&self, row_id: &str) -> CollabResult<()> {
        if self.heads.contains_key(row_id) {
            return Ok(());
        }
        let operations = self.store.load_row(row_id).await?;
        let head = RowHead::from_operations(&operations);
        self.heads.entry(row_id.to_string()).or_insert(head);
        Ok(())
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("node_id", &self.generator.node_id())
            .field("cached_rows", &self.heads.len())
            .finish()
    }
}
