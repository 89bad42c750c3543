//! Redis adapters for tablesync
//!
//! [`RedisNodeConfigStore`] backs node allocation across processes and
//! [`RedisOperationStore`] shares the operation log between them.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablesync_redis::{RedisNodeConfigStore, RedisOperationStore, RedisStoreConfig};
//!
//! let config = RedisStoreConfig::new("redis://127.0.0.1:6379").key_prefix("game");
//! let conn = config.connect().await?;
//! let nodes = Arc::new(RedisNodeConfigStore::new(conn.clone(), config.keys()));
//! let operations = Arc::new(RedisOperationStore::new(conn, config.keys()));
//! ```

pub mod config;
pub mod keys;
pub mod node_store;
pub mod operation_store;

pub use config::{RedisStoreConfig, store_error};
pub use keys::{DEFAULT_KEY_PREFIX, KeySpace};
pub use node_store::RedisNodeConfigStore;
pub use operation_store::RedisOperationStore;
