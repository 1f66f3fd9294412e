//! Bridge configuration
//!
//! Loaded from TOML (`[reclaim]`, `[peers]` tables) or from the environment.
//! Logging settings always come from the environment.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{InteropError, Result};
use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteropConfig {
    #[serde(default)]
    pub reclaim: ReclaimConfig,

    #[serde(default)]
    pub peers: PeersConfig,

    #[serde(skip, default = "LogConfig::from_env")]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimConfig {
    /// Run a dedicated thread that drains the reclamation queue
    #[serde(default = "default_true")]
    pub background: bool,

    /// Registrations released per wake-up
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeersConfig {
    #[serde(default = "default_capacity")]
    pub initial_capacity: usize,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            background: true,
            batch_size: default_batch_size(),
            thread_name: default_thread_name(),
        }
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    64
}

fn default_thread_name() -> String {
    "tak-interop-reclaim".to_string()
}

fn default_capacity() -> usize {
    256
}

impl InteropConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| InteropError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| InteropError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by `TAK_INTEROP_RECLAIM_BACKGROUND`,
    /// `TAK_INTEROP_RECLAIM_BATCH` and `TAK_INTEROP_PEERS_CAPACITY`
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            log: LogConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("TAK_INTEROP_RECLAIM_BACKGROUND") {
            config.reclaim.background = !(val == "0" || val.eq_ignore_ascii_case("false"));
        }

        if let Ok(val) = std::env::var("TAK_INTEROP_RECLAIM_BATCH") {
            config.reclaim.batch_size = val.parse().map_err(|_| {
                InteropError::Config(format!("TAK_INTEROP_RECLAIM_BATCH: not a number: {val}"))
            })?;
        }

        if let Ok(val) = std::env::var("TAK_INTEROP_PEERS_CAPACITY") {
            config.peers.initial_capacity = val.parse().map_err(|_| {
                InteropError::Config(format!("TAK_INTEROP_PEERS_CAPACITY: not a number: {val}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.reclaim.batch_size == 0 {
            return Err(InteropError::Config("reclaim.batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
