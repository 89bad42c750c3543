//! Property-based tests for resolution convergence.
//!
//! Histories are generated by simulating a few replicas that edit one row,
//! occasionally pulling each other's clocks before they write. Whatever the
//! history, every delivery order must resolve to the same row.

use proptest::prelude::*;
use tablesync_collab::{
    ConflictResolver, FieldValue, Operation, OperationKind, Row, VectorClock, merged_clock,
};
use tablesync_id::SnowflakeId;

const ROW: &str = "r1";
const FIELDS: [&str; 3] = ["hp", "name", "level"];
const NODES: u16 = 3;

#[derive(Debug, Clone)]
struct Step {
    node: u16,
    action: u8,
    field: usize,
    value: i8,
    /// Pull another replica's clock before writing
    sync_from: Option<u16>,
    /// Milliseconds since the previous step
    gap_ms: u8,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    (
        0..NODES,
        0u8..10,
        0..FIELDS.len(),
        any::<i8>(),
        prop::option::of(0..NODES),
        0u8..3,
    )
        .prop_map(|(node, action, field, value, sync_from, gap_ms)| Step {
            node,
            action,
            field,
            value,
            sync_from,
            gap_ms,
        })
}

/// Replay `steps` into a set of operations for [`ROW`].
fn simulate(steps: &[Step]) -> Vec<Operation> {
    let mut known = vec![VectorClock::new(); NODES as usize];
    let mut ops = Vec::with_capacity(steps.len() + 1);
    let mut ts = 1i64;

    let mut push = |node: u16, kind, field: Option<(&str, FieldValue)>, clock: VectorClock, ts: i64, seq: usize| {
        ops.push(Operation {
            id: SnowflakeId::compose(ts, 0, node as u8, seq as u16),
            kind,
            row_id: ROW.to_string(),
            field_id: field.as_ref().map(|(f, _)| f.to_string()),
            value: field.map(|(_, v)| v),
            clock,
            author_id: format!("user-{}", node),
            timestamp: ts,
        });
    };

    known[0] = known[0].increment(0);
    push(0, OperationKind::Insert, Some(("hp", FieldValue::Number(1.0))), known[0].clone(), ts, 0);

    for (i, step) in steps.iter().enumerate() {
        let node = step.node as usize;
        if let Some(other) = step.sync_from {
            let pulled = known[other as usize].clone();
            known[node].merge_from(&pulled);
        }
        known[node] = known[node].increment(step.node);
        ts += i64::from(step.gap_ms);

        let field = FIELDS[step.field];
        let value = if step.value % 2 == 0 {
            FieldValue::Number(f64::from(step.value))
        } else {
            FieldValue::Text(step.value.to_string())
        };
        let (kind, write) = match step.action {
            0 => (OperationKind::Delete, None),
            1 => (OperationKind::Insert, Some((field, value))),
            _ => (OperationKind::Update, Some((field, value))),
        };
        push(step.node, kind, write, known[node].clone(), ts, i + 1);
    }

    ops
}

fn resolve(ops: &[Operation]) -> (Row, String) {
    let (row, conflicts) = ConflictResolver::new().resolve_row(ROW, ops);
    let bytes = serde_json::to_string(&(&row, &conflicts)).unwrap();
    (row, bytes)
}

/// Apply a permutation given as sort keys.
fn permute(ops: &[Operation], keys: &[u32]) -> Vec<Operation> {
    let mut keyed: Vec<(u32, Operation)> = ops
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, op)| (keys.get(i).copied().unwrap_or(0), op))
        .collect();
    keyed.sort_by_key(|(k, _)| *k);
    keyed.into_iter().map(|(_, op)| op).collect()
}

proptest! {
    /// Any delivery order resolves to the same row and conflict set.
    #[test]
    fn prop_permutation_converges(
        steps in prop::collection::vec(step_strategy(), 1..40),
        keys in prop::collection::vec(any::<u32>(), 41),
    ) {
        let ops = simulate(&steps);
        let (_, expected) = resolve(&ops);

        let shuffled = permute(&ops, &keys);
        let (_, actual) = resolve(&shuffled);
        prop_assert_eq!(expected, actual);

        let mut reversed = ops.clone();
        reversed.reverse();
        let (_, backwards) = resolve(&reversed);
        prop_assert_eq!(resolve(&ops).1, backwards);
    }

    /// Resolving twice, or with duplicated operations, is byte-identical.
    #[test]
    fn prop_resolution_is_idempotent(
        steps in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let ops = simulate(&steps);
        let (_, first) = resolve(&ops);
        let (_, second) = resolve(&ops);
        prop_assert_eq!(&first, &second);

        let mut doubled = ops.clone();
        doubled.extend(ops.iter().cloned());
        let (_, with_duplicates) = resolve(&doubled);
        prop_assert_eq!(first, with_duplicates);
    }

    /// Winners always carry the highest id among the reported operations,
    /// and the row clock covers every operation.
    #[test]
    fn prop_conflicts_are_well_formed(
        steps in prop::collection::vec(step_strategy(), 1..40),
    ) {
        let ops = simulate(&steps);
        let (row, conflicts) = ConflictResolver::new().resolve_row(ROW, &ops);

        for conflict in &conflicts {
            prop_assert!(!conflict.losing_operation_ids.is_empty());
            prop_assert!(conflict.losing_operation_ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(conflict.losing_operation_ids.iter().all(|id| *id < conflict.winning_operation_id));

            let winner = ops.iter().find(|op| op.id == conflict.winning_operation_id);
            prop_assert!(winner.is_some());
            prop_assert_eq!(row.fields.get(&conflict.field_id), winner.and_then(|op| op.value.as_ref()));
        }

        prop_assert_eq!(row.clock, merged_clock(&ops));
    }
}

#[test]
fn test_last_delete_tombstones_sequential_history() {
    let steps = vec![
        Step { node: 0, action: 5, field: 0, value: 4, sync_from: None, gap_ms: 1 },
        Step { node: 0, action: 0, field: 0, value: 0, sync_from: None, gap_ms: 1 },
    ];
    let ops = simulate(&steps);
    let (row, conflicts) = ConflictResolver::new().resolve_row(ROW, &ops);

    assert!(row.tombstone);
    assert!(row.fields.is_empty());
    assert_eq!(row.version, 0);
    assert!(conflicts.is_empty());
}
