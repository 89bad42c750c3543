//! Deterministic conflict resolution
//!
//! Folds a row's operations into a [`Row`] plus the [`Conflict`]s found on
//! the way. The fold only looks at ids, clocks and values, so every replica
//! holding the same set of operations computes the same result regardless of
//! the order it received them in.
//!
//! Rules:
//!
//! - A field write is erased by any Delete that causally follows it.
//! - Among the surviving writes to a field, those not causally dominated by
//!   another write are the candidates. The candidate with the highest
//!   [`SnowflakeId`] wins; candidates with a different value are reported.
//! - The row is tombstoned while some Delete is not followed by a write, so
//!   a Delete beats a concurrent Update and a later write revives the row.

use crate::operation::{FieldValue, Operation, OperationKind};
use crate::oplog::OperationLog;
use crate::row::{Conflict, Resolution, Row};
use crate::vector_clock::VectorClock;
use crate::CollabResult;
use std::collections::BTreeMap;
use tablesync_id::SnowflakeId;
use tablesync_log::{debug, warn};

/// Stateless, re-entrant resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Fold the operations of `row_id` into its current state.
    ///
    /// Operations for other rows are ignored and duplicates are collapsed by
    /// id, so the same input in any order produces the same output.
    pub fn resolve_row(&self, row_id: &str, operations: &[Operation]) -> (Row, Vec<Conflict>) {
        let mut ops: Vec<&Operation> = operations.iter().filter(|op| op.row_id == row_id).collect();
        ops.sort_by_key(|op| op.id);
        ops.dedup_by_key(|op| op.id);

        let mut row = Row::empty(row_id);
        for op in &ops {
            row.clock.merge_from(&op.clock);
        }

        let deletes: Vec<&Operation> = ops
            .iter()
            .copied()
            .filter(|op| op.kind == OperationKind::Delete)
            .collect();
        let writes: Vec<&Operation> = ops.iter().copied().filter(|op| op.kind.is_write()).collect();

        row.tombstone = deletes
            .iter()
            .any(|d| !writes.iter().any(|w| d.clock.happens_before(&w.clock)));

        let mut by_field: BTreeMap<&str, Vec<(&Operation, &FieldValue)>> = BTreeMap::new();
        for op in &writes {
            let Some((field, value)) = op.written_field() else {
                continue;
            };
            let erased = deletes.iter().any(|d| op.clock.happens_before(&d.clock));
            if !erased {
                by_field.entry(field).or_default().push((op, value));
            }
        }

        let mut conflicts = Vec::new();
        for (field, field_writes) in by_field {
            row.version += field_writes.len() as u32;

            let candidates: Vec<(&Operation, &FieldValue)> = field_writes
                .iter()
                .copied()
                .filter(|(op, _)| !is_dominated(op, &field_writes))
                .collect();

            // writes are id-ordered, so the last candidate has the highest id
            let Some(&(winner, winning_value)) = candidates.last() else {
                continue;
            };

            let losing_operation_ids: Vec<SnowflakeId> = candidates
                .iter()
                .filter(|(op, value)| op.id != winner.id && *value != winning_value)
                .map(|(op, _)| op.id)
                .collect();

            if !losing_operation_ids.is_empty() {
                debug!(
                    "Conflict on {}.{}: {} wins over {} concurrent write(s)",
                    row_id,
                    field,
                    winner.id,
                    losing_operation_ids.len()
                );
                conflicts.push(Conflict {
                    row_id: row_id.to_string(),
                    field_id: field.to_string(),
                    winning_operation_id: winner.id,
                    losing_operation_ids,
                });
            }

            row.fields.insert(field.to_string(), winning_value.clone());
        }

        (row, conflicts)
    }

    /// Recompute `current_rows` from the log.
    ///
    /// Cached rows that disagree with the log are replaced.
    pub async fn resolve_conflicts(&self, current_rows: &[Row], log: &OperationLog) -> CollabResult<Resolution> {
        let mut row_ids: Vec<&str> = current_rows.iter().map(|r| r.id.as_str()).collect();
        row_ids.sort_unstable();
        row_ids.dedup();

        let mut resolution = Resolution::default();
        for row_id in row_ids {
            let ops = log.operations_for(row_id).await?;
            let (row, conflicts) = self.resolve_row(row_id, &ops);

            let stale = current_rows.iter().any(|cached| cached.id == row_id && *cached != row);
            if stale {
                warn!("Cached row {} is stale, replacing with log state", row_id);
            }

            resolution.rows.push(row);
            resolution.conflicts.extend(conflicts);
        }
        Ok(resolution)
    }

    /// Resolve every row the log knows about.
    pub async fn resolve_all(&self, log: &OperationLog) -> CollabResult<Resolution> {
        let mut resolution = Resolution::default();
        for row_id in log.row_ids().await? {
            let ops = log.operations_for(&row_id).await?;
            let (row, conflicts) = self.resolve_row(&row_id, &ops);
            resolution.rows.push(row);
            resolution.conflicts.extend(conflicts);
        }
        debug!(
            "Resolved {} rows, {} conflicts",
            resolution.rows.len(),
            resolution.conflicts.len()
        );
        Ok(resolution)
    }
}

/// Some other write to the same field causally follows `op`.
fn is_dominated(op: &Operation, others: &[(&Operation, &FieldValue)]) -> bool {
    others
        .iter()
        .any(|(other, _)| other.id != op.id && op.clock.happens_before(&other.clock))
}

/// Merge of every clock in `operations`.
pub fn merged_clock<'a>(operations: impl IntoIterator<Item = &'a Operation>) -> VectorClock {
    operations.into_iter().fold(VectorClock::new(), |mut clock, op| {
        clock.merge_from(&op.clock);
        clock
    })
}
