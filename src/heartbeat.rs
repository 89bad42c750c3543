//! Periodic persistence of the generator's last timestamp
//!
//! Runs on a tokio interval next to the engine. Failures are logged and
//! retried on the next tick; id issuance never waits on this task.

use std::sync::Arc;
use std::time::Duration;
use tablesync_id::{IdGenerator, NodeAllocator};
use tablesync_log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running heartbeat task.
pub struct Heartbeat {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Option<i64>>>,
}

impl Heartbeat {
    /// Spawn the heartbeat. `persisted_ms` is the timestamp already stored
    /// for the node, so unchanged values are not written again.
    pub fn spawn(
        allocator: NodeAllocator,
        generator: Arc<IdGenerator>,
        period: Duration,
        persisted_ms: i64,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let node_id = generator.node_id();
        info!("Starting heartbeat for node {} every {:?}", node_id, period);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut persisted = Some(persisted_ms);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        persisted = beat(&allocator, &generator, persisted).await;
                    }
                }
            }

            debug!("Heartbeat for node {} stopped", node_id);
            persisted
        });

        Self {
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for an in-flight write to finish. Returns the
    /// last timestamp the task persisted.
    pub async fn stop(mut self) -> Option<i64> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Persist the generator's latest timestamp if it moved. Returns the value
/// now known to be stored.
pub async fn beat(allocator: &NodeAllocator, generator: &IdGenerator, persisted: Option<i64>) -> Option<i64> {
    let Some(latest) = generator.last_timestamp_ms() else {
        return persisted;
    };
    if persisted.is_some_and(|p| p >= latest) {
        return persisted;
    }

    match allocator.heartbeat(generator.node_id(), latest).await {
        Ok(()) => {
            debug!("Persisted node {} timestamp {}", generator.node_id(), latest);
            Some(latest)
        }
        Err(err) => {
            warn!("Heartbeat for node {} failed: {}", generator.node_id(), err);
            persisted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_id::{GeneratorConfig, InMemoryNodeConfigStore, ManualClock, NodeConfig};

    const NOW: i64 = 1_704_067_300_000;

    async fn setup() -> (InMemoryNodeConfigStore, NodeAllocator, Arc<IdGenerator>) {
        let store = InMemoryNodeConfigStore::new();
        let allocator = NodeAllocator::new(Arc::new(store.clone()), "test");
        let node: NodeConfig = allocator.allocate().await.unwrap();
        let clock = Arc::new(ManualClock::new(NOW));
        let generator = Arc::new(IdGenerator::for_node(&node, GeneratorConfig::default(), clock).unwrap());
        (store, allocator, generator)
    }

    #[tokio::test]
    async fn test_beat_persists_new_timestamp() {
        let (store, allocator, generator) = setup().await;
        generator.next_id().unwrap();

        let persisted = beat(&allocator, &generator, Some(0)).await;
        assert_eq!(persisted, Some(NOW));
        assert_eq!(store.all()[0].last_timestamp_ms, NOW);
    }

    #[tokio::test]
    async fn test_beat_failure_keeps_previous_value() {
        let (store, allocator, generator) = setup().await;
        generator.next_id().unwrap();
        store.fail_next(1);

        assert_eq!(beat(&allocator, &generator, Some(0)).await, Some(0));
        assert_eq!(store.all()[0].last_timestamp_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_persists_on_interval() {
        let (store, allocator, generator) = setup().await;
        let heartbeat = Heartbeat::spawn(allocator, generator.clone(), Duration::from_secs(10), 0);

        generator.next_id().unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.all()[0].last_timestamp_ms, NOW);

        assert_eq!(heartbeat.stop().await, Some(NOW));
    }
}
