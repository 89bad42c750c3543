//! Connection settings and error mapping

use crate::keys::{DEFAULT_KEY_PREFIX, KeySpace};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tablesync_id::StoreError;
use tracing::{debug, info};

/// Redis store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Prefix for every key written by the stores.
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn keys(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }

    /// Open a multiplexed, auto-reconnecting connection.
    pub async fn connect(&self) -> Result<ConnectionManager, StoreError> {
        debug!("Connecting to Redis at {}", self.url);
        let client = redis::Client::open(self.url.as_str()).map_err(store_error)?;
        let conn = client.get_connection_manager().await.map_err(store_error)?;
        info!("Connected to Redis, key prefix {}", self.key_prefix);
        Ok(conn)
    }
}

/// Classify a Redis failure: connectivity problems are retryable.
pub fn store_error(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.keys().prefix(), "tablesync");
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RedisStoreConfig = serde_json::from_str(r#"{"key_prefix": "game"}"#).unwrap();
        assert_eq!(config.url, RedisStoreConfig::default().url);
        assert_eq!(config.keys().node_record(1), "game:node:1");
    }
}
