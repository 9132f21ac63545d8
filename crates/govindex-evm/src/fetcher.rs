//! EVM log fetcher.
//!
//! Walks `[from, to]` with `eth_getLogs` in fixed-size block ranges, retrying
//! transient provider errors and shrinking the range when the node refuses
//! to serve it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn};

use govindex_core::error::IndexerError;
use govindex_core::types::{LogFilter, RawLog};

use crate::retry::RetryPolicy;

/// Default number of blocks requested per `eth_getLogs` call.
pub const DEFAULT_CHUNK_SIZE: u64 = 2_000;

/// JSON-RPC surface the fetcher needs.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// Current chain head (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// Logs matching `filter` in `[from, to]` inclusive (`eth_getLogs`).
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError>;
}

/// Logs of one contiguous block range, ordered by `(block, log index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub from: u64,
    pub to: u64,
    pub logs: Vec<RawLog>,
}

/// Range-batching, retrying wrapper around an [`EvmRpcClient`].
#[derive(Clone)]
pub struct LogFetcher {
    client: Arc<dyn EvmRpcClient>,
    chunk_size: u64,
    retry: RetryPolicy,
}

impl LogFetcher {
    pub fn new(client: Arc<dyn EvmRpcClient>) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Blocks per request (minimum 1).
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current chain head, retried like any other request.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        self.retry
            .run("eth_blockNumber", || self.client.block_number())
            .await
    }

    /// Batches covering `[from, to]` without gaps, in ascending order.
    ///
    /// The stream is finite and ends after the first error. An empty range
    /// (`from > to`) yields nothing.
    pub fn logs(
        &self,
        filter: LogFilter,
        from: u64,
        to: u64,
    ) -> BoxStream<'_, Result<LogBatch, IndexerError>> {
        let start = (from <= to).then_some((from, self.chunk_size));
        stream::try_unfold(start, move |state| {
            let filter = filter.clone();
            async move {
                let Some((from, mut chunk)) = state else {
                    return Ok(None);
                };
                let batch = self.fetch_range(&filter, from, to, &mut chunk).await?;
                info!(
                    address = %filter.address,
                    from = batch.from,
                    to = batch.to,
                    logs = batch.logs.len(),
                    "fetched log batch"
                );
                let next = batch
                    .to
                    .checked_add(1)
                    .filter(|n| *n <= to)
                    .map(|n| (n, chunk));
                Ok(Some((batch, next)))
            }
        })
        .boxed()
    }

    /// Fetch the next range starting at `from`. A `RangeTooLarge` rejection
    /// halves `chunk` and tries again without spending a retry; the smaller
    /// chunk sticks for the rest of the walk.
    async fn fetch_range(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
        chunk: &mut u64,
    ) -> Result<LogBatch, IndexerError> {
        loop {
            let end = from.saturating_add(*chunk - 1).min(to);
            let result = self
                .retry
                .run("eth_getLogs", || self.client.get_logs(filter, from, end))
                .await;
            match result {
                Ok(mut logs) => {
                    logs.retain(|log| !log.is_removed());
                    logs.sort_by_key(RawLog::position);
                    return Ok(LogBatch {
                        from,
                        to: end,
                        logs,
                    });
                }
                Err(IndexerError::RangeTooLarge { reason, .. }) if end > from => {
                    let halved = ((end - from + 1) / 2).max(1);
                    warn!(from, to = end, next_chunk = halved, %reason, "range rejected, splitting");
                    *chunk = halved;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
