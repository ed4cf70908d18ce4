//! Store setup configuration.
//!
//! # Responsibility
//! - Load connection settings, optional logging settings and entity kinds
//!   from JSON.
//! - Build the hook registry those kinds describe.
//!
//! # Invariants
//! - Missing keys fall back to documented defaults.
//! - Unknown keys are rejected so typos fail at startup.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::ConnectionOptions;
use crate::hook::{ConfigurationError, HookRegistry};
use crate::logging::{default_log_level, init_logging};
use crate::model::descriptor::EntityDescriptor;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Absolute directory for rotating log files.
    pub log_dir: String,
}

fn default_level() -> String {
    default_log_level().to_string()
}

/// Setup configuration for an `AuditStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub entity_types: Vec<EntityDescriptor>,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_foreign_keys() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            logging: None,
            entity_types: Vec::new(),
        }
    }
}

impl StoreConfig {
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            foreign_keys: self.foreign_keys,
        }
    }

    /// Registers every configured kind with the default timestamp policy.
    pub fn build_registry(&self) -> Result<HookRegistry, ConfigurationError> {
        HookRegistry::from_descriptors(self.entity_types.iter().cloned())
    }

    /// Starts file logging when a `logging` section is present.
    pub fn init_logging(&self) -> Result<(), String> {
        match &self.logging {
            Some(logging) => init_logging(&logging.level, &logging.log_dir),
            None => Ok(()),
        }
    }
}
