//! Store tuning knobs.
//!
//! Every field has a default, so `{}` is a valid JSON configuration.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Invalid configuration value or unparsable configuration document.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid store configuration: {err}"),
            Self::Invalid { key, message } => write!(f, "invalid `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bytes per stored blob chunk.
    pub blob_chunk_size: usize,
    /// Rows fetched per query page by lazy selections.
    pub page_size: usize,
    pub busy_timeout_ms: u64,
    pub search: SearchConfig,
    pub executor: ExecutorConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub scan_buffer_size: usize,
    pub max_query_len: usize,
    /// Bytes of blob text per index row; consecutive rows overlap by `max_query_len - 1`.
    pub index_chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Payload size at which an item runs sequentially on the caller's thread.
    pub cost_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_rounds: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blob_chunk_size: MIB,
            page_size: 256,
            busy_timeout_ms: 5_000,
            search: SearchConfig::default(),
            executor: ExecutorConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            scan_buffer_size: MIB,
            max_query_len: 4096,
            index_chunk_size: 64 * 1024,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: 64,
            cost_threshold: 50 * MIB as u64,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_rounds: 5 }
    }
}

/// Available parallelism minus two, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

impl StoreConfig {
    /// Parses and validates a JSON document; missing keys take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("blob_chunk_size", self.blob_chunk_size)?;
        non_zero("page_size", self.page_size)?;
        non_zero("search.scan_buffer_size", self.search.scan_buffer_size)?;
        non_zero("search.max_query_len", self.search.max_query_len)?;
        non_zero("search.index_chunk_size", self.search.index_chunk_size)?;
        if self.search.index_chunk_size <= self.search.max_query_len {
            return Err(ConfigError::Invalid {
                key: "search.index_chunk_size",
                message: format!(
                    "must exceed search.max_query_len ({})",
                    self.search.max_query_len
                ),
            });
        }
        non_zero("executor.workers", self.executor.workers)?;
        non_zero("executor.queue_capacity", self.executor.queue_capacity)?;
        if self.pipeline.max_rounds == 0 {
            return Err(ConfigError::Invalid {
                key: "pipeline.max_rounds",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn non_zero(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
