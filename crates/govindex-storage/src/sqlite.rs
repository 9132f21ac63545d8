//! SQLite KV backend.
//!
//! Stores every key in a single `kv` table. SQLite compares BLOBs with
//! `memcmp`, so `ORDER BY key` is the byte order the entity store relies on.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use govindex_storage::sqlite::SqliteKv;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let kv = SqliteKv::open("./govindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let kv = SqliteKv::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::ops::Bound;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use govindex_core::error::IndexerError;

use crate::kv::{is_empty_range, BatchOp, KvStore};

/// Keys bound per `IN (…)` lookup, below SQLite's host parameter limit.
const GET_MANY_CHUNK: usize = 500;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed ordered KV store.
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./govindex.db"`) or a full
    /// SQLite URL (`"sqlite:./govindex.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let kv = Self { pool };
        kv.init_schema().await?;
        Ok(kv)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` sees its own database, so the
    /// pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let kv = Self { pool };
        kv.init_schema().await?;
        Ok(kv)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key   BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    /// One `IN (…)` query per chunk of keys, all inside a single read
    /// transaction so the values come from one snapshot.
    async fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let mut found: HashMap<Vec<u8>, Vec<u8>> = HashMap::with_capacity(keys.len());
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for chunk in keys.chunks(GET_MANY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT key, value FROM kv WHERE key IN ({placeholders})");
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key.as_slice());
            }
            let rows = query.fetch_all(&mut *tx).await.map_err(storage_err)?;
            found.extend(
                rows.into_iter()
                    .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value"))),
            );
        }
        tx.commit().await.map_err(storage_err)?;

        Ok(keys.iter().map(|key| found.get(key).cloned()).collect())
    }

    async fn scan(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError> {
        if limit == 0 || is_empty_range(&lower, &upper) {
            return Ok(vec![]);
        }

        let mut sql = String::from("SELECT key, value FROM kv WHERE 1 = 1");
        let mut binds: Vec<Vec<u8>> = Vec::with_capacity(2);
        match lower {
            Bound::Included(k) => {
                sql.push_str(" AND key >= ?");
                binds.push(k);
            }
            Bound::Excluded(k) => {
                sql.push_str(" AND key > ?");
                binds.push(k);
            }
            Bound::Unbounded => {}
        }
        match upper {
            Bound::Included(k) => {
                sql.push_str(" AND key <= ?");
                binds.push(k);
            }
            Bound::Excluded(k) => {
                sql.push_str(" AND key < ?");
                binds.push(k);
            }
            Bound::Unbounded => {}
        }
        sql.push_str(" ORDER BY key LIMIT ?");

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), IndexerError> {
        let count = ops.len();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")
                        .bind(key)
                        .bind(value)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
                BatchOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                }
            }
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(ops = count, "sqlite batch committed");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde::Deserialize;
    use serde_json::json;

    use govindex_core::entity::{
        EntityDefinition, EntityDefinitions, EntityUpdates, EntityWithMetadata, IndexDefinition,
    };
    use govindex_core::sort_key;
    use govindex_core::store::{EntityStore, IndexScan, ReadOnlyEntityStore};
    use govindex_core::types::BlockIdentifier;

    use super::*;
    use crate::entity_store::KvEntityStore;

    fn put(k: &str, v: &str) -> BatchOp {
        BatchOp::put(k.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn batch_roundtrip() {
        let kv = SqliteKv::in_memory().await.unwrap();
        kv.write_batch(vec![put("a", "1"), put("b", "2")]).await.unwrap();
        kv.write_batch(vec![put("a", "3"), BatchOp::delete(b"b".to_vec())])
            .await
            .unwrap();

        assert_eq!(kv.get(b"a").await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(kv.get(b"b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_orders_bytes_like_memcmp() {
        let kv = SqliteKv::in_memory().await.unwrap();
        kv.write_batch(vec![
            BatchOp::put(b"k\x00b".to_vec(), vec![]),
            BatchOp::put(b"k\x00a".to_vec(), vec![]),
            BatchOp::put(b"k\xfe".to_vec(), vec![]),
            BatchOp::put(b"l".to_vec(), vec![]),
        ])
        .await
        .unwrap();

        let rows = kv
            .scan(
                Bound::Included(b"k".to_vec()),
                Bound::Excluded(b"k\xff".to_vec()),
                10,
            )
            .await
            .unwrap();
        let keys: Vec<_> = rows.into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![b"k\x00a".to_vec(), b"k\x00b".to_vec(), b"k\xfe".to_vec()]
        );

        let rows = kv
            .scan(Bound::Excluded(b"k\x00a".to_vec()), Bound::Unbounded, 2)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"k\x00b".to_vec());
    }

    #[tokio::test]
    async fn get_many_keeps_positions_across_chunks() {
        let kv = SqliteKv::in_memory().await.unwrap();
        let stored: Vec<BatchOp> = (0..1_200u32)
            .filter(|i| i % 3 != 0)
            .map(|i| BatchOp::put(i.to_be_bytes().to_vec(), i.to_le_bytes().to_vec()))
            .collect();
        kv.write_batch(stored).await.unwrap();

        let mut keys: Vec<Vec<u8>> = (0..1_200u32).rev().map(|i| i.to_be_bytes().to_vec()).collect();
        keys.push(7u32.to_be_bytes().to_vec());
        let values = kv.get_many(&keys).await.unwrap();

        assert_eq!(values.len(), keys.len());
        for (key, value) in keys.iter().zip(&values) {
            let i = u32::from_be_bytes(key.as_slice().try_into().unwrap());
            let expected = (i % 3 != 0).then(|| i.to_le_bytes().to_vec());
            assert_eq!(value, &expected, "key {i}");
        }
        assert!(kv.get_many(&[]).await.unwrap().is_empty());
    }

    #[derive(Deserialize)]
    struct Holder {
        balance: u64,
    }

    fn definitions() -> EntityDefinitions {
        EntityDefinitions::combine([EntityDefinition::new("Holder").index(
            IndexDefinition::typed::<Holder>("byBalance", |h| sort_key::u64_desc(h.balance)),
        )])
    }

    fn holder(id: &str, balance: u64) -> EntityWithMetadata {
        EntityWithMetadata {
            entity: "Holder".into(),
            id: id.into(),
            value: json!({ "balance": balance }),
        }
    }

    async fn sqlite_store() -> KvEntityStore<SqliteKv> {
        KvEntityStore::new(SqliteKv::in_memory().await.unwrap()).with_scan_chunk(2)
    }

    async fn flush(
        store: &KvEntityStore<SqliteKv>,
        block: u64,
        entities: Vec<EntityWithMetadata>,
    ) -> Result<(), IndexerError> {
        let mut updates: EntityUpdates = entities.into_iter().collect();
        updates.put_reducer_state("ENSToken", json!({ "block": block }));
        store
            .flush_updates(&BlockIdentifier::number(block), &definitions(), updates)
            .await
    }

    async fn index_ids(store: &KvEntityStore<SqliteKv>) -> Vec<String> {
        store
            .get_entities_by_index("Holder", "byBalance", IndexScan::default())
            .map_ok(|e| e.entity_id)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn entity_store_flushes_into_sqlite() {
        let store = sqlite_store().await;
        flush(&store, 4, vec![holder("a", 1), holder("b", 3), holder("c", 2)])
            .await
            .unwrap();

        assert_eq!(
            store.get_finalized_block().await.unwrap(),
            Some(BlockIdentifier::number(4))
        );
        assert_eq!(
            store.get_entity("Holder", "b").await.unwrap(),
            Some(json!({ "balance": 3 }))
        );
        let checkpoint = store.get_reducer_checkpoint("ENSToken").await.unwrap().unwrap();
        assert_eq!(checkpoint.block, BlockIdentifier::number(4));
        assert_eq!(index_ids(&store).await, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn entity_store_moves_index_entries_in_sqlite() {
        let store = sqlite_store().await;
        flush(&store, 1, vec![holder("a", 1), holder("b", 3)]).await.unwrap();
        flush(&store, 2, vec![holder("a", 9)]).await.unwrap();

        assert_eq!(index_ids(&store).await, vec!["a", "b"]);
        // latest + checkpoint + 2 entities + 2 index entries; the stale one is gone
        let rows = store
            .kv()
            .scan(Bound::Unbounded, Bound::Unbounded, 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[tokio::test]
    async fn rejected_statement_rolls_back_the_whole_flush() {
        let store = sqlite_store().await;
        flush(&store, 1, vec![holder("a", 5)]).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON kv
             WHEN instr(NEW.key, CAST('poison' AS BLOB)) > 0
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .execute(&store.kv().pool)
        .await
        .unwrap();

        let err = flush(&store, 2, vec![holder("a", 8), holder("poison", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));

        assert_eq!(
            store.get_finalized_block().await.unwrap(),
            Some(BlockIdentifier::number(1))
        );
        assert_eq!(
            store.get_entity("Holder", "a").await.unwrap(),
            Some(json!({ "balance": 5 }))
        );
        let checkpoint = store.get_reducer_checkpoint("ENSToken").await.unwrap().unwrap();
        assert_eq!(checkpoint.block, BlockIdentifier::number(1));
        assert_eq!(index_ids(&store).await, vec!["a"]);
    }
}
