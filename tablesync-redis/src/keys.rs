//! Redis key layout
//!
//! ```text
//! {prefix}:node:{id}          JSON NodeConfig
//! {prefix}:node:{id}:owner    active claim marker (owner string)
//! {prefix}:nodes:active       SET of active node ids
//! {prefix}:nodes:known        SET of node ids with a record
//! {prefix}:ops:ids            SET of stored operation ids
//! {prefix}:ops:row:{row}      LIST of JSON operations
//! {prefix}:rows               SET of row ids
//! ```

use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_PREFIX: &str = "tablesync";

/// Builds every key the adapters touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(':');
        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_KEY_PREFIX.to_string()
            } else {
                prefix.to_string()
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn node_record(&self, node_id: u16) -> String {
        format!("{}:node:{}", self.prefix, node_id)
    }

    pub fn node_marker(&self, node_id: u16) -> String {
        format!("{}:node:{}:owner", self.prefix, node_id)
    }

    pub fn active_nodes(&self) -> String {
        format!("{}:nodes:active", self.prefix)
    }

    pub fn known_nodes(&self) -> String {
        format!("{}:nodes:known", self.prefix)
    }

    pub fn operation_ids(&self) -> String {
        format!("{}:ops:ids", self.prefix)
    }

    pub fn row_operations(&self, row_id: &str) -> String {
        format!("{}:ops:row:{}", self.prefix, row_id)
    }

    pub fn rows(&self) -> String {
        format!("{}:rows", self.prefix)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
