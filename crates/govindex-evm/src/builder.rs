//! Fluent builder for replay runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use govindex_evm::{reducers, IndexerBuilder};
//! use govindex_storage::{KvEntityStore, MemoryKv};
//!
//! # async fn run() -> Result<(), govindex_core::IndexerError> {
//! let engine = IndexerBuilder::new()
//!     .rpc_url("https://eth.llamarpc.com")
//!     .chunk_size(5_000)
//!     .confirmation_depth(12)
//!     .reducers(reducers::default_reducers())
//!     .build_http(Arc::new(KvEntityStore::new(MemoryKv::new())))?;
//! let report = engine.run_once().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use govindex_core::error::IndexerError;
use govindex_core::indexer::{IndexerConfig, RetryConfig};
use govindex_core::store::EntityStore;

use crate::fetcher::{EvmRpcClient, LogFetcher};
use crate::http::HttpRpcClient;
use crate::reducer::ReducerPass;
use crate::replay::ReplayEngine;
use crate::retry::RetryPolicy;

/// Fluent builder for [`IndexerConfig`] and the [`ReplayEngine`] it drives.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    request_timeout: Option<Duration>,
    reducers: Vec<Arc<dyn ReducerPass>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Chain label used in logs.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// Blocks per `eth_getLogs` request.
    pub fn chunk_size(mut self, blocks: u64) -> Self {
        self.config.chunk_size = blocks;
        self
    }

    /// Blocks to stay behind the chain head.
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn scan_chunk(mut self, keys: usize) -> Self {
        self.config.scan_chunk = keys;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Add one reducer. Reducers run in the order they were added.
    pub fn reducer(mut self, reducer: Arc<dyn ReducerPass>) -> Self {
        self.reducers.push(reducer);
        self
    }

    pub fn reducers(mut self, reducers: impl IntoIterator<Item = Arc<dyn ReducerPass>>) -> Self {
        self.reducers.extend(reducers);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build an engine over an explicit RPC client.
    pub fn build(
        self,
        client: Arc<dyn EvmRpcClient>,
        store: Arc<dyn EntityStore>,
    ) -> Result<ReplayEngine, IndexerError> {
        self.config.validate()?;
        if self.reducers.is_empty() {
            return Err(IndexerError::Config("no reducers registered".into()));
        }
        let fetcher = LogFetcher::new(client)
            .with_chunk_size(self.config.chunk_size)
            .with_retry(RetryPolicy::new(self.config.retry.clone()));
        Ok(ReplayEngine::new(
            fetcher,
            store,
            self.reducers,
            self.config.confirmation_depth,
        ))
    }

    /// Build an engine talking JSON-RPC over HTTP to `rpc_url`.
    pub fn build_http(self, store: Arc<dyn EntityStore>) -> Result<ReplayEngine, IndexerError> {
        if self.config.rpc_url.is_empty() {
            return Err(IndexerError::Config("rpc_url is not set".into()));
        }
        let client = match self.request_timeout {
            Some(timeout) => HttpRpcClient::new(&self.config.rpc_url, timeout)?,
            None => HttpRpcClient::default_for(&self.config.rpc_url)?,
        };
        self.build(Arc::new(client), store)
    }
}

#[cfg(test)]
mod tests {
    use govindex_storage::{KvEntityStore, MemoryKv};

    use super::*;
    use crate::reducers::default_reducers;
    use crate::testing::MockRpcClient;

    fn store() -> Arc<dyn EntityStore> {
        Arc::new(KvEntityStore::new(MemoryKv::new()))
    }

    #[test]
    fn builder_defaults() {
        let cfg = IndexerBuilder::new().build_config();
        assert_eq!(cfg.chain, "ethereum");
        assert_eq!(cfg.confirmation_depth, 0);
        assert_eq!(cfg.chunk_size, 2_000);
        assert!(cfg.rpc_url.is_empty());
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexerBuilder::new()
            .chain("sepolia")
            .rpc_url("http://localhost:8545")
            .chunk_size(500)
            .confirmation_depth(32)
            .scan_chunk(64)
            .build_config();

        assert_eq!(cfg.chain, "sepolia");
        assert_eq!(cfg.rpc_url, "http://localhost:8545");
        assert_eq!(cfg.chunk_size, 500);
        assert_eq!(cfg.confirmation_depth, 32);
        assert_eq!(cfg.scan_chunk, 64);
    }

    #[test]
    fn engine_requires_reducers_and_valid_config() {
        let client: Arc<dyn EvmRpcClient> = Arc::new(MockRpcClient::new(10));
        let err = IndexerBuilder::new().build(client.clone(), store()).err().unwrap();
        assert!(matches!(err, IndexerError::Config(_)));

        let err = IndexerBuilder::new()
            .chunk_size(0)
            .reducers(default_reducers())
            .build(client.clone(), store())
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));

        let engine = IndexerBuilder::new()
            .reducers(default_reducers())
            .build(client, store())
            .unwrap();
        assert_eq!(engine.reducers().len(), 2);
        assert!(engine.definitions().get("Delegate").is_some());
        assert!(engine.definitions().get("Vote").is_some());
    }

    #[test]
    fn http_engine_requires_url() {
        let err = IndexerBuilder::new()
            .reducers(default_reducers())
            .build_http(store())
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
