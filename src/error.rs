//! Engine-level errors

use tablesync_collab::CollabError;
use tablesync_config::ConfigError;
use tablesync_id::{IdError, StoreError};
use thiserror::Error;

/// Errors surfaced by [`TableSync`](crate::TableSync).
#[derive(Error, Debug)]
pub enum TableSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Collab(#[from] CollabError),

    /// The node slot has been released; issuing more ids could collide
    /// with whoever claims it next.
    #[error("Engine for node {0} has been shut down")]
    ShutDown(u16),
}

impl From<StoreError> for TableSyncError {
    fn from(err: StoreError) -> Self {
        TableSyncError::Id(IdError::Store(err))
    }
}

impl TableSyncError {
    /// The edit was rejected and nothing was appended.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, TableSyncError::Collab(CollabError::InvalidOperation(_)))
    }

    /// The wall clock went backwards beyond tolerance.
    pub fn is_clock_rollback(&self) -> bool {
        matches!(
            self,
            TableSyncError::Id(IdError::ClockMovedBackwards { .. })
                | TableSyncError::Collab(CollabError::Id(IdError::ClockMovedBackwards { .. }))
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TableSyncError>;
