//! Node identity records

use crate::snowflake::{MACHINE_BITS, MAX_MACHINE_ID};
use crate::{IdError, IdResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use tablesync_config::MAX_NODE_ID;

/// Number of node slots.
pub const NODE_SLOTS: usize = MAX_NODE_ID as usize + 1;

/// Split a node id into `(datacenter_id, machine_id)`.
pub fn split_node_id(node_id: u16) -> IdResult<(u8, u8)> {
    if node_id > MAX_NODE_ID {
        return Err(IdError::InvalidNodeId(u32::from(node_id)));
    }
    let datacenter = (node_id >> MACHINE_BITS) as u8;
    let machine = (node_id & u16::from(MAX_MACHINE_ID)) as u8;
    Ok((datacenter, machine))
}

/// The persisted claim of one node slot by one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u16,
    pub datacenter_id: u8,
    pub machine_id: u8,
    /// `false` once the owner shut down; the slot may then be reclaimed
    pub active: bool,
    /// Latest timestamp known to have been used for ids on this node
    pub last_timestamp_ms: i64,
    /// Instance that claimed the slot
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl NodeConfig {
    /// A fresh active claim. `last_timestamp_ms` carries over whatever the
    /// previous holder of the slot recorded.
    pub fn new(node_id: u16, owner: impl Into<String>, last_timestamp_ms: i64) -> IdResult<Self> {
        let (datacenter_id, machine_id) = split_node_id(node_id)?;
        let now = Utc::now();

        Ok(Self {
            node_id,
            datacenter_id,
            machine_id,
            active: true,
            last_timestamp_ms,
            owner: owner.into(),
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        })
    }

    /// Mark the record retired.
    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.deactivated_at = Some(at);
        self.updated_at = at;
    }

    /// Record a newer last timestamp. Older values are ignored.
    pub fn observe_timestamp(&mut self, last_timestamp_ms: i64) {
        if last_timestamp_ms > self.last_timestamp_ms {
            self.last_timestamp_ms = last_timestamp_ms;
            self.updated_at = Utc::now();
        }
    }

    /// Whether the record may be removed by a cleanup with this cutoff.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        !self.active && self.deactivated_at.unwrap_or(self.updated_at) < cutoff
    }
}
