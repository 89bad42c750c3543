//! Operation log in Redis
//!
//! Each row's operations live in a list of JSON documents. A global id set
//! guards the append so that replaying a replicated operation is a no-op.

use crate::config::store_error;
use crate::keys::KeySpace;
use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tablesync_collab::{Operation, OperationStore};
use tablesync_id::StoreError;
use tracing::{trace, warn};

const APPEND_SCRIPT: &str = r#"
    if redis.call("SADD", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("RPUSH", KEYS[2], ARGV[2])
    redis.call("SADD", KEYS[3], ARGV[3])
    return 1
"#;

/// Redis-backed [`OperationStore`].
#[derive(Clone)]
pub struct RedisOperationStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisOperationStore {
    pub fn new(conn: ConnectionManager, keys: KeySpace) -> Self {
        Self { conn, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }
}

#[async_trait]
impl OperationStore for RedisOperationStore {
    async fn append(&self, operation: &Operation) -> Result<bool, StoreError> {
        let document = serde_json::to_string(operation)?;
        let mut conn = self.conn.clone();

        let appended: i32 = Script::new(APPEND_SCRIPT)
            .key(self.keys.operation_ids())
            .key(self.keys.row_operations(&operation.row_id))
            .key(self.keys.rows())
            .arg(operation.id.to_string())
            .arg(document)
            .arg(&operation.row_id)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        trace!("Append {} to {}: {}", operation.id, operation.row_id, appended == 1);
        Ok(appended == 1)
    }

    async fn load_row(&self, row_id: &str) -> Result<Vec<Operation>, StoreError> {
        let mut conn = self.conn.clone();
        let documents: Vec<String> = redis::cmd("LRANGE")
            .arg(self.keys.row_operations(row_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        documents
            .iter()
            .map(|doc| {
                serde_json::from_str(doc).map_err(|err| {
                    warn!("Undecodable operation in row {}: {}", row_id, err);
                    StoreError::from(err)
                })
            })
            .collect()
    }

    async fn row_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(self.keys.rows())
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }
}
