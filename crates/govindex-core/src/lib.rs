//! govindex-core: entity model and store contracts for replaying contract
//! logs into queryable entities.
//!
//! # Architecture
//!
//! ```text
//! LogFetcher → Replay engine ──┬── HandlerRegistry (signature → reduce fn)
//!                              └── EntityStore     (atomic flush + indexes)
//!                                       ↑
//!                         ReadOnlyEntityStore ← pagination / queries
//! ```

pub mod entity;
pub mod error;
pub mod handler;
pub mod indexer;
pub mod keys;
pub mod sort_key;
pub mod store;
pub mod types;

pub use entity::{
    EntityDefinition, EntityDefinitions, EntityKey, EntityUpdates, EntityWithMetadata,
    FinalizedUpdate, IndexDefinition,
};
pub use error::{IndexerError, ReduceError};
pub use handler::{ContractEvent, HandlerRegistry, ReduceFn};
pub use indexer::{IndexerConfig, IndexerState, RetryConfig};
pub use store::{
    EntityStore, IndexScan, IndexedEntity, ReadOnlyEntityStore, ReducerCheckpoint, ScanPosition,
};
pub use types::{BlockIdentifier, LogFilter, RawLog};
