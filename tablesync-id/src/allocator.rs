//! Node id allocation
//!
//! Scans the 10-bit node space in ascending order for the first slot without
//! an active claim and claims it through the store. Uniqueness under races is
//! enforced by the store's atomic claim, not by the scan: a lost race simply
//! moves on to the next candidate.

use crate::node::MAX_NODE_ID;
use crate::store::NodeConfigStore;
use crate::{IdError, IdResult, NodeConfig};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tablesync_config::AllocationSettings;
use tablesync_log::{debug, info, warn};

/// Claims, resumes and retires node ids.
#[derive(Clone)]
pub struct NodeAllocator {
    store: Arc<dyn NodeConfigStore>,
    owner: String,
    settings: AllocationSettings,
}

impl NodeAllocator {
    pub fn new(store: Arc<dyn NodeConfigStore>, owner: impl Into<String>) -> Self {
        Self::with_settings(store, owner, AllocationSettings::default())
    }

    pub fn with_settings(
        store: Arc<dyn NodeConfigStore>,
        owner: impl Into<String>,
        settings: AllocationSettings,
    ) -> Self {
        Self {
            store,
            owner: owner.into(),
            settings,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &Arc<dyn NodeConfigStore> {
        &self.store
    }

    /// Claim the lowest free node id, or reuse the active slot this owner
    /// already holds (a previous run that exited without deactivating).
    ///
    /// Owners must be unique among running processes and stable across
    /// restarts for slots to be reused. Fails with [`IdError::NoAvailableNodeId`] when all 1024 slots are
    /// active. Store outages are retried with exponential backoff.
    pub async fn allocate(&self) -> IdResult<NodeConfig> {
        self.retrying("allocate", move || self.try_allocate()).await
    }

    /// Reuse `node_id` if this owner still holds it, otherwise claim it if
    /// it is free. Another active owner yields [`IdError::NodeIdInUse`].
    pub async fn resume(&self, node_id: u16) -> IdResult<NodeConfig> {
        if node_id > MAX_NODE_ID {
            return Err(IdError::InvalidNodeId(u32::from(node_id)));
        }
        self.retrying("resume", move || self.try_resume(node_id)).await
    }

    /// Retire `node_id`; its slot becomes reclaimable.
    pub async fn deactivate(&self, node_id: u16) -> IdResult<bool> {
        let deactivated = self.store.deactivate(node_id, Utc::now()).await?;
        if deactivated {
            info!("Deactivated node {}", node_id);
        } else {
            debug!("Node {} was not active", node_id);
        }
        Ok(deactivated)
    }

    /// Persist the latest used timestamp for crash recovery.
    pub async fn heartbeat(&self, node_id: u16, last_timestamp_ms: i64) -> IdResult<()> {
        self.store
            .record_timestamp(node_id, last_timestamp_ms)
            .await
            .map_err(IdError::from)
    }

    /// Remove inactive records deactivated more than `older_than_days` ago.
    pub async fn cleanup_stale(&self, older_than_days: u32) -> IdResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let removed = self.store.delete_inactive_before(cutoff).await?;
        if removed > 0 {
            info!("Removed {} stale node records older than {} days", removed, older_than_days);
        }
        Ok(removed)
    }

    /// [`cleanup_stale`](Self::cleanup_stale) with the configured retention.
    pub async fn cleanup_with_retention(&self) -> IdResult<usize> {
        self.cleanup_stale(self.settings.retention_days).await
    }

    async fn try_allocate(&self) -> IdResult<NodeConfig> {
        if let Some(existing) = self.store.find_active_by_owner(&self.owner).await? {
            info!(
                "Reusing node {} still held by {} (last timestamp {})",
                existing.node_id, self.owner, existing.last_timestamp_ms
            );
            return Ok(existing);
        }

        let active = self.store.active_node_ids().await?;
        debug!("Allocating node id, {} slots active", active.len());

        for candidate in 0..=MAX_NODE_ID {
            if active.contains(&candidate) {
                continue;
            }

            let config = self.fresh_claim(candidate).await?;
            if self.store.claim(&config).await? {
                info!(
                    "Allocated node {} (datacenter {}, machine {}) to {}",
                    config.node_id, config.datacenter_id, config.machine_id, self.owner
                );
                return Ok(config);
            }
            debug!("Lost claim race for node {}", candidate);
        }

        Err(IdError::NoAvailableNodeId)
    }

    async fn try_resume(&self, node_id: u16) -> IdResult<NodeConfig> {
        match self.store.get(node_id).await? {
            Some(existing) if existing.active && existing.owner == self.owner => {
                info!(
                    "Resuming node {} (last timestamp {})",
                    node_id, existing.last_timestamp_ms
                );
                Ok(existing)
            }
            Some(existing) if existing.active => Err(IdError::NodeIdInUse {
                node_id,
                owner: existing.owner,
            }),
            _ => {
                let config = self.fresh_claim(node_id).await?;
                if self.store.claim(&config).await? {
                    info!("Claimed requested node {} for {}", node_id, self.owner);
                    return Ok(config);
                }
                let owner = self
                    .store
                    .get(node_id)
                    .await?
                    .map(|n| n.owner)
                    .unwrap_or_default();
                Err(IdError::NodeIdInUse { node_id, owner })
            }
        }
    }

    /// A new claim that keeps the previous holder's last timestamp, so ids
    /// issued under the reclaimed slot never go back in time.
    async fn fresh_claim(&self, node_id: u16) -> IdResult<NodeConfig> {
        let previous = self
            .store
            .get(node_id)
            .await?
            .map(|n| n.last_timestamp_ms)
            .unwrap_or(0);
        NodeConfig::new(node_id, self.owner.clone(), previous)
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> IdResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IdResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(IdError::Store(err))
                    if err.is_retryable() && attempt < self.settings.max_attempts =>
                {
                    let delay = self.settings.backoff(attempt);
                    warn!(
                        "Node {} attempt {} failed ({}), retrying in {:?}",
                        operation, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryNodeConfigStore;
    use crate::StoreError;

    fn allocator(store: &InMemoryNodeConfigStore, owner: &str) -> NodeAllocator {
        NodeAllocator::new(Arc::new(store.clone()), owner)
    }

    #[tokio::test]
    async fn test_allocates_lowest_free_id() {
        let store = InMemoryNodeConfigStore::new();
        let a = allocator(&store, "a").allocate().await.unwrap();
        let b = allocator(&store, "b").allocate().await.unwrap();
        assert_eq!((a.node_id, b.node_id), (0, 1));

        allocator(&store, "a").deactivate(0).await.unwrap();
        let c = allocator(&store, "c").allocate().await.unwrap();
        assert_eq!(c.node_id, 0);
        assert_eq!(c.owner, "c");
    }

    #[tokio::test]
    async fn test_allocate_reuses_slot_after_crash() {
        let store = InMemoryNodeConfigStore::new();
        allocator(&store, "other").allocate().await.unwrap();

        let crashed = allocator(&store, "reporting-1");
        let first = crashed.allocate().await.unwrap();
        crashed.heartbeat(first.node_id, 9_000).await.unwrap();

        // restart without deactivating
        let second = allocator(&store, "reporting-1").allocate().await.unwrap();
        assert_eq!(second.node_id, first.node_id);
        assert_eq!(second.last_timestamp_ms, 9_000);
        assert_eq!(store.active_node_ids().await.unwrap().len(), 2);

        let fresh = allocator(&store, "reporting-2").allocate().await.unwrap();
        assert_eq!(fresh.node_id, 2);
    }

    #[tokio::test]
    async fn test_reclaimed_slot_keeps_last_timestamp() {
        let store = InMemoryNodeConfigStore::new();
        let first = allocator(&store, "a");
        let node = first.allocate().await.unwrap();
        first.heartbeat(node.node_id, 5_000).await.unwrap();
        first.deactivate(node.node_id).await.unwrap();

        let second = allocator(&store, "b").allocate().await.unwrap();
        assert_eq!(second.node_id, node.node_id);
        assert_eq!(second.last_timestamp_ms, 5_000);
    }

    #[tokio::test]
    async fn test_all_slots_taken() {
        let store = InMemoryNodeConfigStore::new();
        for id in 0..=MAX_NODE_ID {
            store.insert(NodeConfig::new(id, "other", 0).unwrap());
        }

        let result = allocator(&store, "late").allocate().await;
        assert!(matches!(result, Err(IdError::NoAvailableNodeId)));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let store = InMemoryNodeConfigStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let allocator = allocator(&store, &format!("worker-{}", i));
            handles.push(tokio::spawn(async move { allocator.allocate().await }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().node_id);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(*ids.last().unwrap(), 31);
    }

    #[tokio::test]
    async fn test_resume_same_owner() {
        let store = InMemoryNodeConfigStore::new();
        let a = allocator(&store, "a");
        let node = a.resume(200).await.unwrap();
        a.heartbeat(200, 777).await.unwrap();

        let again = a.resume(200).await.unwrap();
        assert_eq!(again.node_id, node.node_id);
        assert_eq!(again.last_timestamp_ms, 777);

        let other = allocator(&store, "b").resume(200).await;
        assert!(matches!(
            other,
            Err(IdError::NodeIdInUse { node_id: 200, ref owner }) if owner == "a"
        ));
    }

    #[tokio::test]
    async fn test_resume_rejects_out_of_range() {
        let store = InMemoryNodeConfigStore::new();
        assert!(matches!(
            allocator(&store, "a").resume(1024).await,
            Err(IdError::InvalidNodeId(1024))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocate_retries_unavailable_store() {
        let store = InMemoryNodeConfigStore::new();
        store.fail_next(2);

        let node = allocator(&store, "a").allocate().await.unwrap();
        assert_eq!(node.node_id, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocate_gives_up_after_max_attempts() {
        let store = InMemoryNodeConfigStore::new();
        store.fail_next(10);
        let allocator = NodeAllocator::with_settings(
            Arc::new(store.clone()),
            "a",
            AllocationSettings {
                max_attempts: 3,
                ..AllocationSettings::default()
            },
        );

        let result = allocator.allocate().await;
        assert!(matches!(
            result,
            Err(IdError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let store = InMemoryNodeConfigStore::new();
        let mut old = NodeConfig::new(5, "gone", 0).unwrap();
        old.deactivate(Utc::now() - chrono::Duration::days(45));
        store.insert(old);
        store.insert(NodeConfig::new(6, "live", 0).unwrap());

        let removed = allocator(&store, "a").cleanup_stale(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.all().len(), 1);
    }
}
