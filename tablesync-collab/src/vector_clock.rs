//! Vector clocks for causality tracking
//!
//! One counter per node id. A node only ever increments its own entry and
//! merging takes the per-node maximum, so `compare` yields the
//! happened-before partial order between two edits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relation of one clock to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CausalOrder {
    /// Strictly happened before the other
    Before,
    /// Strictly happened after the other
    After,
    /// Neither precedes the other
    Concurrent,
    /// Identical entries
    Equal,
}

/// Vector clock keyed by node id.
///
/// Entries are kept in a `BTreeMap` so that serialization is byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<u16, u64>,
}

impl VectorClock {
    /// An empty clock (every counter is zero)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(node, counter)` pairs. Zero counters are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = (u16, u64)>) -> Self {
        Self {
            entries: entries.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }

    /// Counter for a node
    pub fn get(&self, node: u16) -> u64 {
        self.entries.get(&node).copied().unwrap_or(0)
    }

    /// A copy of this clock with `node` advanced by one.
    pub fn increment(&self, node: u16) -> Self {
        let mut next = self.clone();
        next.tick(node);
        next
    }

    /// Advance `node` in place and return its new counter
    pub fn tick(&mut self, node: u16) -> u64 {
        let counter = self.entries.entry(node).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raise `node`'s counter to at least `counter`
    pub fn advance_to(&mut self, node: u16, counter: u64) {
        if counter > 0 {
            let entry = self.entries.entry(node).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    /// Pointwise maximum of two clocks
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// Pointwise maximum, in place
    pub fn merge_from(&mut self, other: &Self) {
        for (&node, &counter) in &other.entries {
            let entry = self.entries.entry(node).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    /// Causal relation of `self` to `other`
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_le = true;
        let mut other_le = true;

        for node in self.entries.keys().chain(other.entries.keys()) {
            let a = self.get(*node);
            let b = other.get(*node);
            if a > b {
                self_le = false;
            }
            if b > a {
                other_le = false;
            }
            if !self_le && !other_le {
                return CausalOrder::Concurrent;
            }
        }

        match (self_le, other_le) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// `self < other`
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// Neither clock precedes the other
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Every entry of `self` is at least the matching entry of `other`
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }

    /// Non-zero entries in node order
    pub fn entries(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.entries.iter().map(|(n, c)| (*n, *c))
    }

    /// Number of nodes with a non-zero counter
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_is_pure() {
        let base = VectorClock::new();
        let next = base.increment(3);
        assert_eq!(base.get(3), 0);
        assert_eq!(next.get(3), 1);
        assert_eq!(next.increment(3).get(3), 2);
    }

    #[test]
    fn test_compare() {
        let a = VectorClock::from_entries([(1, 1)]);
        let b = a.increment(1);
        let c = a.increment(2);

        assert_eq!(a.compare(&b), CausalOrder::Before);
        assert_eq!(b.compare(&a), CausalOrder::After);
        assert_eq!(b.compare(&c), CausalOrder::Concurrent);
        assert_eq!(a.compare(&a.clone()), CausalOrder::Equal);
        assert!(a.happens_before(&c));
        assert!(b.is_concurrent(&c));
    }

    #[test]
    fn test_missing_entries_count_as_zero() {
        let empty = VectorClock::new();
        let one = VectorClock::from_entries([(7, 1)]);
        assert_eq!(empty.compare(&one), CausalOrder::Before);
        assert_eq!(VectorClock::from_entries([(7, 0)]), empty);
    }

    #[test]
    fn test_advance_to_never_lowers() {
        let mut clock = VectorClock::from_entries([(1, 4)]);
        clock.advance_to(1, 2);
        assert_eq!(clock.get(1), 4);
        clock.advance_to(1, 6);
        clock.advance_to(3, 0);
        assert_eq!(clock, VectorClock::from_entries([(1, 6)]));
    }

    #[test]
    fn test_merge_takes_max() {
        let a = VectorClock::from_entries([(1, 3), (2, 1)]);
        let b = VectorClock::from_entries([(2, 4), (5, 1)]);
        let merged = a.merge(&b);

        assert_eq!(merged.get(1), 3);
        assert_eq!(merged.get(2), 4);
        assert_eq!(merged.get(5), 1);
        assert!(merged.dominates(&a));
        assert!(merged.dominates(&b));
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_serialization_is_stable() {
        let a = VectorClock::from_entries([(9, 1), (2, 5)]);
        let b = VectorClock::from_entries([(2, 5), (9, 1)]);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, serde_json::to_string(&b).unwrap());
        assert_eq!(json, r#"{"2":5,"9":1}"#);

        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
