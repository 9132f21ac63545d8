//! govindex-storage: ordered KV backends and the entity store built on them.
//!
//! Backends:
//! - [`memory`]: in-memory `BTreeMap` (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! [`KvEntityStore`] implements the core store traits over any backend and
//! [`pagination`] serves Relay-style pages from its indexes.

pub mod entity_store;
pub mod kv;
pub mod memory;
pub mod pagination;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use entity_store::KvEntityStore;
pub use kv::{BatchOp, KvStore};
pub use memory::MemoryKv;
pub use pagination::{page_by_index, Connection, Edge, PageInfo};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKv;
