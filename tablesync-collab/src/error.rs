//! Error types for the collaboration engine

use tablesync_id::{IdError, StoreError};
use thiserror::Error;

/// Collaboration error types
#[derive(Error, Debug)]
pub enum CollabError {
    /// The edit is malformed or not applicable to the row; nothing was appended
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// No operation has ever touched this row
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// Id generation failed (clock rollback, node exhaustion)
    #[error(transparent)]
    Id(#[from] IdError),

    /// The operation store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CollabError {
    fn from(err: serde_json::Error) -> Self {
        CollabError::Serialization(err.to_string())
    }
}

/// Result type for collaboration operations
pub type CollabResult<T> = Result<T, CollabError>;
