//! cpool.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default upper bound on a single request/response frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Default number of databases a worker keeps cached.
pub const DEFAULT_MAX_DATABASES_PER_WORKER: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
}

/// Settings read by the worker process itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Frames larger than this are rejected by the request loop.
    pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::Text,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Output format of the worker's stderr log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings for the coordinator's per-worker cache bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Databases held by one worker before the least recently used ones
    /// are evicted.
    pub max_databases_per_worker: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_databases_per_worker: DEFAULT_MAX_DATABASES_PER_WORKER,
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.cache.max_databases_per_worker == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_databases_per_worker must be at least 1".to_string(),
            ));
        }
        if self.worker.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_frame_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
