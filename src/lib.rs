// tablesync - collaborative table editing without row locks
//
// Globally unique, time-ordered Snowflake ids across processes plus a
// vector-clock operation log that every replica resolves to the same rows.

pub mod engine;
pub mod error;
pub mod heartbeat;

pub use engine::TableSync;
pub use error::{Result, TableSyncError};
pub use heartbeat::Heartbeat;

// Re-export the member crates
pub use tablesync_collab;
pub use tablesync_config;
pub use tablesync_id;
pub use tablesync_log;

#[cfg(feature = "redis")]
pub use tablesync_redis;

pub use tablesync_collab::{
    CausalOrder, CollabError, CollaborationSessionTracker, Conflict, ConflictResolver,
    EditingState, FieldValue, InMemoryOperationStore, Operation, OperationDraft, OperationKind,
    OperationLog, OperationStore, Resolution, Row, UserPresence, VectorClock,
};
pub use tablesync_config::TableSyncConfig;
pub use tablesync_id::{
    Clock, IdError, InMemoryNodeConfigStore, ManualClock, NodeConfig, NodeConfigStore, ParsedId,
    SnowflakeId, SystemClock,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Conflict, FieldValue, Operation, OperationDraft, Result, Row, SnowflakeId, TableSync,
        TableSyncConfig, TableSyncError,
    };
}
