//! Unique Id Generation for tablesync
//!
//! Snowflake-style 64-bit identifiers issued without coordination on every
//! call, plus the node allocation that makes them globally unique.
//!
//! ## Features
//!
//! - **Snowflake ids** - 41-bit timestamp, 10-bit node, 12-bit sequence
//! - **Clock safety** - rollbacks beyond a small tolerance fail instead of
//!   reissuing ids; restarts resume from the persisted last timestamp
//! - **Node allocation** - lowest free id claimed atomically through a
//!   pluggable [`NodeConfigStore`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablesync_id::*;
//!
//! let store = Arc::new(InMemoryNodeConfigStore::new());
//! let allocator = NodeAllocator::new(store, "reporting-1");
//! let node = allocator.allocate().await?;
//!
//! let generator = IdGenerator::for_node(&node, GeneratorConfig::default(), Arc::new(SystemClock))?;
//! let id = generator.next_id()?;
//! println!("{} issued by node {}", id, id.node_id());
//! ```

pub mod allocator;
pub mod clock;
pub mod error;
pub mod generator;
pub mod node;
pub mod snowflake;
pub mod store;

pub use allocator::NodeAllocator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{IdError, IdResult, StoreError};
pub use generator::{GeneratorConfig, IdGenerator};
pub use node::{MAX_NODE_ID, NODE_SLOTS, NodeConfig, split_node_id};
pub use snowflake::{ParsedId, SnowflakeId, is_valid_id, parse_id};
pub use store::{InMemoryNodeConfigStore, NodeConfigStore};
