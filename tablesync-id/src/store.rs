//! Node store port and in-memory adapter
//!
//! The allocation table is the only state in the system that needs a
//! strongly consistent write: [`NodeConfigStore::claim`] must succeed for at
//! most one caller per free slot.

use crate::{NodeConfig, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Persistence of node claims.
///
/// Implement this trait to back allocation with a database (unique index on
/// the active node id) or a key-value store with compare-and-set.
#[async_trait]
pub trait NodeConfigStore: Send + Sync {
    /// Node ids currently held by an active record.
    async fn active_node_ids(&self) -> Result<BTreeSet<u16>, StoreError>;

    /// The record for a slot, active or not.
    async fn get(&self, node_id: u16) -> Result<Option<NodeConfig>, StoreError>;

    /// Atomically store `config` if the slot has no record or only an
    /// inactive one. Returns `false` when another active owner holds it.
    async fn claim(&self, config: &NodeConfig) -> Result<bool, StoreError>;

    /// Raise the stored `last_timestamp_ms`; lower values are ignored.
    async fn record_timestamp(&self, node_id: u16, last_timestamp_ms: i64) -> Result<(), StoreError>;

    /// Mark the slot inactive. Returns `false` if there was no active record.
    async fn deactivate(&self, node_id: u16, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Remove inactive records deactivated before `cutoff`.
    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// The lowest active record held by `owner`, if any.
    async fn find_active_by_owner(&self, owner: &str) -> Result<Option<NodeConfig>, StoreError> {
        for node_id in self.active_node_ids().await? {
            if let Some(existing) = self.get(node_id).await?
                && existing.active
                && existing.owner == owner
            {
                return Ok(Some(existing));
            }
        }
        Ok(None)
    }
}

/// In-memory node store (for testing/development and single-process use)
#[derive(Clone, Default)]
pub struct InMemoryNodeConfigStore {
    nodes: Arc<DashMap<u16, NodeConfig>>,
    failures: Arc<AtomicU32>,
}

impl InMemoryNodeConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// All records (for testing)
    pub fn all(&self) -> Vec<NodeConfig> {
        let mut nodes: Vec<NodeConfig> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by_key(|n| n.node_id);
        nodes
    }

    /// Insert or replace a record without the claim check (for seeding)
    pub fn insert(&self, config: NodeConfig) {
        self.nodes.insert(config.node_id, config);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl NodeConfigStore for InMemoryNodeConfigStore {
    async fn active_node_ids(&self) -> Result<BTreeSet<u16>, StoreError> {
        self.check_available()?;
        Ok(self
            .nodes
            .iter()
            .filter(|e| e.value().active)
            .map(|e| *e.key())
            .collect())
    }

    async fn get(&self, node_id: u16) -> Result<Option<NodeConfig>, StoreError> {
        self.check_available()?;
        Ok(self.nodes.get(&node_id).map(|e| e.value().clone()))
    }

    async fn claim(&self, config: &NodeConfig) -> Result<bool, StoreError> {
        self.check_available()?;
        match self.nodes.entry(config.node_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().active {
                    Ok(false)
                } else {
                    entry.insert(config.clone());
                    Ok(true)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(config.clone());
                Ok(true)
            }
        }
    }

    async fn record_timestamp(&self, node_id: u16, last_timestamp_ms: i64) -> Result<(), StoreError> {
        self.check_available()?;
        if let Some(mut node) = self.nodes.get_mut(&node_id) {
            node.observe_timestamp(last_timestamp_ms);
        }
        Ok(())
    }

    async fn deactivate(&self, node_id: u16, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check_available()?;
        match self.nodes.get_mut(&node_id) {
            Some(mut node) if node.active => {
                node.deactivate(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_available()?;
        let before = self.nodes.len();
        self.nodes.retain(|_, node| !node.is_stale(cutoff));
        Ok(before - self.nodes.len())
    }
}
