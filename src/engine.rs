//! The tablesync engine
//!
//! One [`TableSync`] per process. Startup claims (or resumes) a node id,
//! primes the id generator from the slot's persisted timestamp and starts
//! the heartbeat. Share the engine by `Arc`.

use crate::error::{Result, TableSyncError};
use crate::heartbeat::Heartbeat;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tablesync_collab::{
    CollabError, CollaborationSessionTracker, Conflict, ConflictResolver, EditingState, Operation,
    OperationDraft, OperationLog, OperationStore, Resolution, Row, UserPresence, VectorClock,
};
use tablesync_config::{TableSyncConfig, Validate};
use tablesync_id::{
    Clock, GeneratorConfig, IdError, IdGenerator, NodeAllocator, NodeConfig, NodeConfigStore,
    ParsedId, SnowflakeId, SystemClock,
};
use tablesync_log::{debug, info, warn};

/// Id generation, operation log, conflict resolution and presence for one
/// node.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tablesync::{OperationDraft, TableSync, TableSyncConfig};
/// use tablesync::{InMemoryNodeConfigStore, InMemoryOperationStore};
///
/// # async fn example() -> tablesync::Result<()> {
/// let engine = TableSync::start(
///     TableSyncConfig::default(),
///     Arc::new(InMemoryNodeConfigStore::new()),
///     Arc::new(InMemoryOperationStore::new()),
/// )
/// .await?;
///
/// engine.apply_operation(OperationDraft::insert("r1", "alice").with_field("hp", 100)).await?;
/// let (row, conflicts) = engine.resolve("r1").await?;
/// assert!(conflicts.is_empty());
///
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct TableSync {
    config: TableSyncConfig,
    node: NodeConfig,
    allocator: NodeAllocator,
    generator: Arc<IdGenerator>,
    log: OperationLog,
    resolver: ConflictResolver,
    presence: CollaborationSessionTracker,
    heartbeat: Mutex<Option<Heartbeat>>,
    shut_down: AtomicBool,
}

impl TableSync {
    /// Start on the system clock.
    pub async fn start(
        config: TableSyncConfig,
        nodes: Arc<dyn NodeConfigStore>,
        operations: Arc<dyn OperationStore>,
    ) -> Result<Self> {
        Self::start_with_clock(config, nodes, operations, Arc::new(SystemClock)).await
    }

    /// Start with an explicit clock, shared by the id generator and presence.
    pub async fn start_with_clock(
        config: TableSyncConfig,
        nodes: Arc<dyn NodeConfigStore>,
        operations: Arc<dyn OperationStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let allocator =
            NodeAllocator::with_settings(nodes, config.node.owner.clone(), config.allocation.clone());
        let node = match config.node.node_id {
            Some(node_id) => allocator.resume(node_id).await?,
            None => allocator.allocate().await?,
        };

        let generator = Arc::new(IdGenerator::for_node(
            &node,
            GeneratorConfig::from(&config.id),
            clock.clone(),
        )?);
        let log = OperationLog::new(operations, generator.clone());
        let presence = CollaborationSessionTracker::with_clock(config.presence.ttl(), clock);
        let heartbeat = Heartbeat::spawn(
            allocator.clone(),
            generator.clone(),
            config.id.heartbeat_interval(),
            node.last_timestamp_ms,
        );

        info!(
            "TableSync started as node {} (datacenter {}, machine {}) for {}",
            node.node_id, node.datacenter_id, node.machine_id, node.owner
        );

        Ok(Self {
            config,
            node,
            allocator,
            generator,
            log,
            resolver: ConflictResolver::new(),
            presence,
            heartbeat: Mutex::new(Some(heartbeat)),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &TableSyncConfig {
        &self.config
    }

    /// The claimed node record as of startup.
    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    pub fn node_id(&self) -> u16 {
        self.node.node_id
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn presence(&self) -> &CollaborationSessionTracker {
        &self.presence
    }

    /// Issue a new id.
    pub fn generate_id(&self) -> Result<SnowflakeId> {
        self.ensure_running()?;
        self.generator.next_id().map_err(|err| self.retired_as_shutdown(err.into()))
    }

    /// Validate, stamp and append a local edit. The author is marked present
    /// on the row.
    pub async fn apply_operation(&self, draft: OperationDraft) -> Result<Operation> {
        self.ensure_running()?;
        let operation = self
            .log
            .append(draft)
            .await
            .map_err(|err| self.retired_as_shutdown(err.into()))?;
        self.presence
            .touch(&operation.author_id, &operation.row_id, operation.field_id.as_deref());
        Ok(operation)
    }

    /// Accept an operation replicated from another node. Returns `false` if
    /// it was already known.
    pub async fn ingest(&self, operation: Operation) -> Result<bool> {
        Ok(self.log.ingest(operation).await?)
    }

    /// Current state of one row and the conflicts found while resolving it.
    pub async fn resolve(&self, row_id: &str) -> Result<(Row, Vec<Conflict>)> {
        let operations = self.log.operations_for(row_id).await?;
        if operations.is_empty() {
            return Err(CollabError::RowNotFound(row_id.to_string()).into());
        }
        let (row, conflicts) = self.resolver.resolve_row(row_id, &operations);
        if !conflicts.is_empty() {
            debug!("Row {} resolved with {} conflict(s)", row_id, conflicts.len());
        }
        Ok((row, conflicts))
    }

    /// Resolve every row in the log.
    pub async fn resolve_all(&self) -> Result<Resolution> {
        Ok(self.resolver.resolve_all(&self.log).await?)
    }

    /// Recompute cached rows from the log.
    pub async fn resolve_conflicts(&self, current_rows: &[Row]) -> Result<Resolution> {
        Ok(self.resolver.resolve_conflicts(current_rows, &self.log).await?)
    }

    /// The clock a client should send back as `observed_clock`.
    pub async fn row_clock(&self, row_id: &str) -> Result<VectorClock> {
        Ok(self.log.row_clock(row_id).await?)
    }

    pub fn touch_presence(&self, user_id: &str, row_id: &str, field_id: Option<&str>) {
        self.presence.touch(user_id, row_id, field_id);
    }

    pub fn presence_snapshot(&self, row_id: &str) -> Vec<UserPresence> {
        self.presence.snapshot(row_id)
    }

    pub fn leave_presence(&self, user_id: &str, row_id: &str) -> bool {
        self.presence.leave(user_id, row_id)
    }

    pub fn presence_state(&self, row_id: &str) -> EditingState {
        self.presence.state(row_id)
    }

    /// Decode an id issued under this engine's epoch.
    pub fn parse_id(&self, id: SnowflakeId) -> ParsedId {
        self.generator.parse_id(id)
    }

    pub fn is_valid_id(&self, id: SnowflakeId) -> bool {
        self.generator.is_valid_id(id)
    }

    /// Remove node records retired longer than the configured retention.
    pub async fn cleanup_stale_nodes(&self) -> Result<usize> {
        Ok(self.allocator.cleanup_with_retention().await?)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the heartbeat, persist the final timestamp and release the
    /// node id. Further id generation fails with [`TableSyncError::ShutDown`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // no id can be issued past this point
        let retired_at = self.generator.retire();

        let heartbeat = self.heartbeat.lock().take();
        let persisted = match heartbeat {
            Some(heartbeat) => heartbeat.stop().await,
            None => None,
        };

        if let Some(latest) = retired_at
            && persisted.is_none_or(|p| p < latest)
            && let Err(err) = self.allocator.heartbeat(self.node.node_id, latest).await
        {
            warn!("Failed to persist final timestamp for node {}: {}", self.node.node_id, err);
        }

        self.allocator.deactivate(self.node.node_id).await?;
        info!("TableSync node {} shut down", self.node.node_id);
        Ok(())
    }

    /// A generator retired by a concurrent shutdown surfaces as `ShutDown`.
    fn retired_as_shutdown(&self, err: TableSyncError) -> TableSyncError {
        match err {
            TableSyncError::Id(IdError::Retired { .. })
            | TableSyncError::Collab(CollabError::Id(IdError::Retired { .. })) => {
                TableSyncError::ShutDown(self.node.node_id)
            }
            other => other,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(TableSyncError::ShutDown(self.node.node_id))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for TableSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSync")
            .field("node", &self.node)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
