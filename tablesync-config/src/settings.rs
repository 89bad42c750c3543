//! Typed engine configuration.

use crate::loader::merge_values;
use crate::{ConfigError, ConfigLoader, ConfigValidator, EnvLoader, Result, Validate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default custom epoch: 2024-01-01T00:00:00Z.
pub const DEFAULT_EPOCH_MS: i64 = 1_704_067_200_000;

/// Highest node id in the flat 10-bit node space.
pub const MAX_NODE_ID: u16 = 1023;

/// Complete configuration of a tablesync engine instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSyncConfig {
    pub node: NodeSettings,
    pub id: IdSettings,
    pub allocation: AllocationSettings,
    pub presence: PresenceSettings,
}

/// Identity of this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Recorded on the claimed node slot. A restart with the same owner
    /// reuses the slot a crashed run left active, so set this to something
    /// stable per process (the default pid changes on every restart) and
    /// never share it between processes running at the same time.
    pub owner: String,
    /// Resume or claim this node id instead of scanning for the first free one.
    pub node_id: Option<u16>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            owner: format!("pid-{}", std::process::id()),
            node_id: None,
        }
    }
}

/// Snowflake generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdSettings {
    /// Milliseconds since the Unix epoch that map to timestamp zero.
    pub epoch_ms: i64,
    /// Backward clock drift that is waited out instead of failing.
    pub clock_tolerance_ms: u64,
    /// How often `last_timestamp_ms` is persisted.
    pub heartbeat_interval_ms: u64,
}

impl Default for IdSettings {
    fn default() -> Self {
        Self {
            epoch_ms: DEFAULT_EPOCH_MS,
            clock_tolerance_ms: 5,
            heartbeat_interval_ms: 10_000,
        }
    }
}

impl IdSettings {
    pub fn clock_tolerance(&self) -> Duration {
        Duration::from_millis(self.clock_tolerance_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Node allocation retry and retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Attempts made while the node store is unavailable.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Deactivated node records older than this are removed by cleanup.
    pub retention_days: u32,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            retention_days: 30,
        }
    }
}

impl AllocationSettings {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Presence tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// Inactivity after which a presence entry is ignored.
    pub ttl_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl PresenceSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Validate for TableSyncConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.node.owner, "node.owner")?;
        if let Some(node_id) = self.node.node_id {
            ConfigValidator::in_range(node_id, 0, MAX_NODE_ID, "node.node_id")?;
        }
        ConfigValidator::at_least(self.id.epoch_ms, 0, "id.epoch_ms")?;
        ConfigValidator::in_range(self.id.clock_tolerance_ms, 0, 1_000, "id.clock_tolerance_ms")?;
        ConfigValidator::at_least(self.id.heartbeat_interval_ms, 1, "id.heartbeat_interval_ms")?;
        ConfigValidator::at_least(self.allocation.max_attempts, 1, "allocation.max_attempts")?;
        ConfigValidator::at_least(
            self.allocation.max_backoff_ms,
            self.allocation.initial_backoff_ms,
            "allocation.max_backoff_ms",
        )?;
        ConfigValidator::at_least(self.presence.ttl_secs, 1, "presence.ttl_secs")?;
        Ok(())
    }
}

impl TableSyncConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults overlaid with `TABLESYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }
}

/// Layers defaults, an optional file, an optional `.env` file and the
/// environment (in that order), then validates.
pub struct ConfigBuilder {
    file: Option<PathBuf>,
    dotenv: bool,
    env_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: false,
            env_prefix: Some("TABLESYNC".to_string()),
            overrides: Vec::new(),
        }
    }

    /// Read a TOML or JSON file (format chosen by extension).
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Load `.env` from the working directory before reading the environment.
    pub fn dotenv(mut self, enabled: bool) -> Self {
        self.dotenv = enabled;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Skip the process environment entirely.
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Explicit `PREFIX_SECTION__KEY=value` pairs applied after the environment.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<TableSyncConfig> {
        let mut tree = serde_json::to_value(TableSyncConfig::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        if let Some(path) = &self.file {
            let loader = ConfigLoader::auto(path)?;
            merge_values(&mut tree, loader.load_file(path)?);
        }

        if self.dotenv {
            // A missing .env file is not an error
            dotenvy::dotenv().ok();
        }

        let prefix = self.env_prefix.clone().unwrap_or_else(|| "TABLESYNC".to_string());
        let env = EnvLoader::new(prefix);
        if self.env_prefix.is_some() {
            merge_values(&mut tree, env.load());
        }
        if !self.overrides.is_empty() {
            merge_values(&mut tree, env.from_pairs(self.overrides));
        }

        let config: TableSyncConfig = serde_json::from_value(tree)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TableSyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.presence.ttl(), Duration::from_secs(300));
        assert_eq!(config.id.clock_tolerance(), Duration::from_millis(5));
        assert_eq!(config.id.epoch_ms, DEFAULT_EPOCH_MS);
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [node]
            owner = "reporting-1"
            node_id = 12

            [id]
            clock_tolerance_ms = 2
            "#
        )
        .unwrap();

        let config = TableSyncConfig::builder()
            .without_env()
            .file(file.path())
            .set("TABLESYNC_ID__CLOCK_TOLERANCE_MS", "4")
            .build()
            .unwrap();

        assert_eq!(config.node.owner, "reporting-1");
        assert_eq!(config.node.node_id, Some(12));
        assert_eq!(config.id.clock_tolerance_ms, 4);
        assert_eq!(config.id.heartbeat_interval_ms, 10_000);
    }

    #[test]
    fn test_out_of_range_node_id_rejected() {
        let result = TableSyncConfig::builder()
            .without_env()
            .set("TABLESYNC_NODE__NODE_ID", "4096")
            .build();

        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = AllocationSettings {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..AllocationSettings::default()
        };

        assert_eq!(settings.backoff(1), Duration::from_millis(100));
        assert_eq!(settings.backoff(2), Duration::from_millis(200));
        assert_eq!(settings.backoff(3), Duration::from_millis(350));
        assert_eq!(settings.backoff(40), Duration::from_millis(350));
    }
}
