//! Integration tests against a live Redis.
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -p tablesync-redis -- --ignored`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tablesync_collab::{ConflictResolver, OperationDraft, OperationLog, OperationStore};
use tablesync_id::{GeneratorConfig, IdError, IdGenerator, NodeAllocator, NodeConfigStore};
use tablesync_redis::{RedisNodeConfigStore, RedisOperationStore, RedisStoreConfig};

fn config() -> RedisStoreConfig {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    RedisStoreConfig::new(url).key_prefix(format!("tablesync-test-{}", nanos))
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_allocation_is_exclusive() {
    let config = config();
    let conn = config.connect().await.unwrap();
    let store: Arc<dyn NodeConfigStore> = Arc::new(RedisNodeConfigStore::new(conn, config.keys()));

    let a = NodeAllocator::new(store.clone(), "a").allocate().await.unwrap();
    let b = NodeAllocator::new(store.clone(), "b").allocate().await.unwrap();
    assert_eq!((a.node_id, b.node_id), (0, 1));

    let taken = NodeAllocator::new(store.clone(), "c").resume(0).await;
    assert!(matches!(taken, Err(IdError::NodeIdInUse { node_id: 0, .. })));

    let allocator = NodeAllocator::new(store.clone(), "a");
    allocator.heartbeat(0, 42).await.unwrap();
    assert!(allocator.deactivate(0).await.unwrap());
    assert!(!allocator.deactivate(0).await.unwrap());

    let reclaimed = NodeAllocator::new(store.clone(), "c").allocate().await.unwrap();
    assert_eq!(reclaimed.node_id, 0);
    assert_eq!(reclaimed.last_timestamp_ms, 42);
    assert_eq!(store.active_node_ids().await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_operation_log_round_trip() {
    let config = config();
    let conn = config.connect().await.unwrap();
    let store = Arc::new(RedisOperationStore::new(conn, config.keys()));
    let generator = Arc::new(IdGenerator::new(3, GeneratorConfig::default()).unwrap());
    let log = OperationLog::new(store.clone(), generator);

    let insert = log
        .append(OperationDraft::insert("r1", "alice").with_field("hp", 100))
        .await
        .unwrap();
    log.append(OperationDraft::update("r1", "hp", 120, "bob")).await.unwrap();

    assert!(!store.append(&insert).await.unwrap());
    assert_eq!(log.row_ids().await.unwrap(), vec!["r1"]);

    let ops = log.operations_for("r1").await.unwrap();
    assert_eq!(ops.len(), 2);
    let (row, conflicts) = ConflictResolver::new().resolve_row("r1", &ops);
    assert_eq!(row.version, 2);
    assert!(conflicts.is_empty());
}
