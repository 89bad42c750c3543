//! Error types for id generation and node allocation

use thiserror::Error;

/// Errors raised by a node store adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached; the call may be retried
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Id generation and allocation errors
#[derive(Error, Debug)]
pub enum IdError {
    /// The wall clock went backwards further than the configured tolerance
    #[error("Clock moved backwards by {drift_ms}ms, refusing to generate id")]
    ClockMovedBackwards { drift_ms: u64 },

    /// Every slot of the 10-bit node space is held by an active node
    #[error("No available node id (all 1024 slots are active)")]
    NoAvailableNodeId,

    /// The requested node id is held by another owner
    #[error("Node id {node_id} is in use by {owner}")]
    NodeIdInUse { node_id: u16, owner: String },

    /// Node id outside 0..=1023
    #[error("Invalid node id: {0}")]
    InvalidNodeId(u32),

    /// The clock reads outside the 41-bit window starting at the epoch
    #[error("Timestamp {timestamp_ms} is outside the representable range")]
    TimestampOutOfRange { timestamp_ms: i64 },

    /// The generator was retired; its node id may belong to someone else
    #[error("Generator for node {node_id} is retired")]
    Retired { node_id: u16 },

    /// A decimal id string could not be parsed
    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for id operations
pub type IdResult<T> = Result<T, IdError>;
