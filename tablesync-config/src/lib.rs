// Configuration management for the tablesync engine
//
// Defaults are overlaid with an optional TOML/JSON file, an optional .env
// file and `TABLESYNC_SECTION__KEY` environment variables, then validated.

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{
    AllocationSettings, ConfigBuilder, DEFAULT_EPOCH_MS, IdSettings, MAX_NODE_ID, NodeSettings,
    PresenceSettings, TableSyncConfig,
};
pub use validation::{ConfigValidator, Validate};
