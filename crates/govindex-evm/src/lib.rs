//! govindex-evm: EVM log fetching, ABI decoding, the governance reducers and
//! the replay engine that folds their logs into the entity store.
//!
//! ```text
//! HttpRpcClient ─► LogFetcher ─► ReplayEngine ─► Reducer (token, governor)
//!                   (chunks,        │                │
//!                    retries)       └── EntityStore ◄┘ entities + checkpoint
//! ```

pub mod abi;
pub mod builder;
pub mod fetcher;
pub mod http;
pub mod reducer;
pub mod reducers;
pub mod replay;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::IndexerBuilder;
pub use fetcher::{EvmRpcClient, LogBatch, LogFetcher};
pub use http::HttpRpcClient;
pub use reducer::{Reducer, ReducerPass};
pub use replay::{HandlerFailure, PassOutcome, PassReport, ReplayEngine, RunReport};
pub use retry::RetryPolicy;
