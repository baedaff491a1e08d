//! On-disk configuration for the account-state subsystem: where the
//! RocksDB backend lives, how it's tuned, and whether periodic
//! checkpointing is enabled.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub storage: StorageConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// RocksDB database directory.
    pub db_path: PathBuf,

    /// Max open file handles, passed straight through to RocksDB options.
    #[serde(default = "default_max_open_files")]
    pub max_open_files: i32,

    /// Block cache size in megabytes.
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: usize,
}

fn default_max_open_files() -> i32 {
    1000
}

fn default_cache_size_mb() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Whether a caller should periodically snapshot the state root to
    /// durable storage outside the normal commit path.
    pub enabled: bool,

    /// Interval between checkpoints, in committed batches.
    #[serde(default = "default_checkpoint_interval")]
    pub interval_batches: u64,
}

fn default_checkpoint_interval() -> u64 {
    1000
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { enabled: false, interval_batches: default_checkpoint_interval() }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                db_path: PathBuf::from("./data/state"),
                max_open_files: default_max_open_files(),
                cache_size_mb: default_cache_size_mb(),
            },
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl StateConfig {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_open_files <= 0 {
            anyhow::bail!("max_open_files must be greater than 0");
        }
        if self.storage.cache_size_mb == 0 {
            anyhow::bail!("cache_size_mb must be greater than 0");
        }
        if self.checkpoint.enabled && self.checkpoint.interval_batches == 0 {
            anyhow::bail!("checkpoint.interval_batches must be greater than 0 when enabled");
        }
        Ok(())
    }
}
