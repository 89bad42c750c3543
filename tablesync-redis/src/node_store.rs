//! Node allocation table in Redis
//!
//! Claims are decided by `SETNX` on a per-slot owner marker inside a Lua
//! script, so at most one instance holds a slot even when many start at
//! once. The JSON record outlives the marker and keeps the slot's
//! `last_timestamp_ms` for whoever claims it next.

use crate::config::store_error;
use crate::keys::KeySpace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use tablesync_id::{NodeConfig, NodeConfigStore, StoreError};
use tracing::{debug, info, warn};

const CLAIM_SCRIPT: &str = r#"
    if redis.call("SETNX", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("SET", KEYS[2], ARGV[2])
    redis.call("SADD", KEYS[3], ARGV[3])
    redis.call("SADD", KEYS[4], ARGV[3])
    return 1
"#;

const RECORD_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) ~= ARGV[1] then
        return 0
    end
    redis.call("SET", KEYS[2], ARGV[2])
    return 1
"#;

const DEACTIVATE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) ~= ARGV[1] then
        return 0
    end
    redis.call("DEL", KEYS[1])
    redis.call("SET", KEYS[2], ARGV[2])
    redis.call("SREM", KEYS[3], ARGV[3])
    return 1
"#;

const DELETE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 1 then
        return 0
    end
    redis.call("DEL", KEYS[2])
    redis.call("SREM", KEYS[3], ARGV[1])
    return 1
"#;

/// Redis-backed [`NodeConfigStore`].
#[derive(Clone)]
pub struct RedisNodeConfigStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisNodeConfigStore {
    /// Create a node store
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use tablesync_redis::{KeySpace, RedisNodeConfigStore};
    ///
    /// let client = redis::Client::open("redis://127.0.0.1/")?;
    /// let conn = client.get_connection_manager().await?;
    /// let store = RedisNodeConfigStore::new(conn, KeySpace::default());
    /// ```
    pub fn new(conn: ConnectionManager, keys: KeySpace) -> Self {
        Self { conn, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    async fn members(&self, key: String) -> Result<BTreeSet<u16>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(members
            .iter()
            .filter_map(|m| match m.parse::<u16>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!("Ignoring malformed node id {:?} in {}", m, key);
                    None
                }
            })
            .collect())
    }

    /// Write `config` only while its owner still holds the slot marker.
    async fn write_if_owner(&self, config: &NodeConfig) -> Result<bool, StoreError> {
        let record = serde_json::to_string(config)?;
        let mut conn = self.conn.clone();
        let written: i32 = Script::new(RECORD_SCRIPT)
            .key(self.keys.node_marker(config.node_id))
            .key(self.keys.node_record(config.node_id))
            .arg(&config.owner)
            .arg(record)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(written == 1)
    }
}

#[async_trait]
impl NodeConfigStore for RedisNodeConfigStore {
    async fn active_node_ids(&self) -> Result<BTreeSet<u16>, StoreError> {
        self.members(self.keys.active_nodes()).await
    }

    async fn get(&self, node_id: u16) -> Result<Option<NodeConfig>, StoreError> {
        let mut conn = self.conn.clone();
        let record: Option<String> = redis::cmd("GET")
            .arg(self.keys.node_record(node_id))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        record
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn claim(&self, config: &NodeConfig) -> Result<bool, StoreError> {
        let record = serde_json::to_string(config)?;
        let mut conn = self.conn.clone();

        let claimed: i32 = Script::new(CLAIM_SCRIPT)
            .key(self.keys.node_marker(config.node_id))
            .key(self.keys.node_record(config.node_id))
            .key(self.keys.active_nodes())
            .key(self.keys.known_nodes())
            .arg(&config.owner)
            .arg(record)
            .arg(config.node_id)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        if claimed == 1 {
            info!("Claimed node {} for {}", config.node_id, config.owner);
            Ok(true)
        } else {
            debug!("Node {} already claimed", config.node_id);
            Ok(false)
        }
    }

    async fn record_timestamp(&self, node_id: u16, last_timestamp_ms: i64) -> Result<(), StoreError> {
        let Some(mut config) = self.get(node_id).await? else {
            return Ok(());
        };
        if !config.active || last_timestamp_ms <= config.last_timestamp_ms {
            return Ok(());
        }

        config.observe_timestamp(last_timestamp_ms);
        if !self.write_if_owner(&config).await? {
            warn!("Heartbeat for node {} skipped: slot no longer held by {}", node_id, config.owner);
        }
        Ok(())
    }

    async fn deactivate(&self, node_id: u16, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(mut config) = self.get(node_id).await? else {
            return Ok(false);
        };
        if !config.active {
            return Ok(false);
        }

        config.deactivate(at);
        let record = serde_json::to_string(&config)?;
        let mut conn = self.conn.clone();
        let deactivated: i32 = Script::new(DEACTIVATE_SCRIPT)
            .key(self.keys.node_marker(node_id))
            .key(self.keys.node_record(node_id))
            .key(self.keys.active_nodes())
            .arg(&config.owner)
            .arg(record)
            .arg(node_id)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(deactivated == 1)
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for node_id in self.members(self.keys.known_nodes()).await? {
            let stale = self
                .get(node_id)
                .await?
                .is_some_and(|config| config.is_stale(cutoff));
            if !stale {
                continue;
            }

            let mut conn = self.conn.clone();
            let deleted: i32 = Script::new(DELETE_SCRIPT)
                .key(self.keys.node_marker(node_id))
                .key(self.keys.node_record(node_id))
                .key(self.keys.known_nodes())
                .arg(node_id)
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            removed += deleted as usize;
        }

        if removed > 0 {
            info!("Removed {} stale node records", removed);
        }
        Ok(removed)
    }
}
