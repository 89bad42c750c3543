//! Conflict-free collaborative editing of table rows
//!
//! Edits are recorded as immutable [`Operation`]s, each stamped with a
//! Snowflake id and a per-row [`VectorClock`]. The [`ConflictResolver`]
//! folds a row's operations into a [`Row`] deterministically: replicas that
//! hold the same operations agree on the same row, whatever order the
//! operations arrived in.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tablesync_collab::{ConflictResolver, InMemoryOperationStore, OperationDraft, OperationLog};
//! use tablesync_id::{GeneratorConfig, IdGenerator};
//!
//! # async fn example() -> tablesync_collab::CollabResult<()> {
//! let generator = Arc::new(IdGenerator::new(1, GeneratorConfig::default())?);
//! let log = OperationLog::new(Arc::new(InMemoryOperationStore::new()), generator);
//!
//! log.append(OperationDraft::insert("r1", "alice").with_field("hp", 100)).await?;
//! log.append(OperationDraft::update("r1", "hp", 120, "bob")).await?;
//!
//! let ops = log.operations_for("r1").await?;
//! let (row, conflicts) = ConflictResolver::new().resolve_row("r1", &ops);
//! assert_eq!(row.version, 2);
//! assert!(conflicts.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod operation;
pub mod oplog;
pub mod presence;
pub mod resolver;
pub mod row;
pub mod store;
pub mod vector_clock;

pub use error::{CollabError, CollabResult};
pub use operation::{FieldValue, Operation, OperationDraft, OperationKind};
pub use oplog::OperationLog;
pub use presence::{CollaborationSessionTracker, DEFAULT_PRESENCE_TTL, EditingState, UserPresence};
pub use resolver::{ConflictResolver, merged_clock};
pub use row::{Conflict, Resolution, Row};
pub use store::{InMemoryOperationStore, OperationStore};
pub use vector_clock::{CausalOrder, VectorClock};
