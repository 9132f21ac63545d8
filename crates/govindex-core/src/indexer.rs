//! Indexer configuration and state types.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for a replay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Chain label used in logs (e.g. `"ethereum"`).
    pub chain: String,
    /// JSON-RPC endpoint. Empty means "must be supplied elsewhere".
    pub rpc_url: String,
    /// How many blocks to request per `eth_getLogs` call.
    pub chunk_size: u64,
    /// Blocks to stay behind the head. Replay does not handle reorgs, so a
    /// non-zero depth is the only protection against them.
    pub confirmation_depth: u64,
    /// Keys pulled from the KV backend per scan request.
    pub scan_chunk: usize,
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            rpc_url: String::new(),
            chunk_size: 2_000,
            confirmation_depth: 0,
            scan_chunk: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| IndexerError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.chunk_size == 0 {
            return Err(IndexerError::Config("chunk_size must be at least 1".into()));
        }
        if self.scan_chunk == 0 {
            return Err(IndexerError::Config("scan_chunk must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_fraction) {
            return Err(IndexerError::Config(
                "retry.jitter_fraction must be within [0, 1]".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config(
                "retry.multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Backoff settings for transient provider errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction of it.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// How one reducer's pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Flushed through the target block.
    Done,
    /// Aborted by a fatal error; the previous checkpoint is intact.
    Failed,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
