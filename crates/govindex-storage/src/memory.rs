//! In-memory KV backend.
//!
//! Holds every key in a `BTreeMap` behind a lock. Useful for tests and
//! one-shot replays that don't need persistence.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use govindex_core::error::IndexerError;

use crate::kv::{is_empty_range, BatchOp, KvStore};

/// In-memory ordered KV store. All data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, IndexerError> {
        self.data
            .read()
            .map_err(|_| IndexerError::Storage("memory kv lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, IndexerError> {
        self.data
            .write()
            .map_err(|_| IndexerError::Storage("memory kv lock poisoned".into()))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        let data = self.read()?;
        Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
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
        let data = self.read()?;
        Ok(data
            .range((lower, upper))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), IndexerError> {
        let mut data = self.write()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(k: &str, v: &str) -> BatchOp {
        BatchOp::put(k.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn batch_then_read() {
        let kv = MemoryKv::new();
        kv.write_batch(vec![put("a", "1"), put("b", "2"), put("c", "3")])
            .await
            .unwrap();
        kv.write_batch(vec![BatchOp::delete(b"b".to_vec()), put("a", "9")])
            .await
            .unwrap();

        assert_eq!(kv.get(b"a").await.unwrap(), Some(b"9".to_vec()));
        assert_eq!(kv.get(b"b").await.unwrap(), None);
        assert_eq!(
            kv.get_many(&[b"c".to_vec(), b"zz".to_vec()]).await.unwrap(),
            vec![Some(b"3".to_vec()), None]
        );
        assert_eq!(kv.len(), 2);
    }

    #[tokio::test]
    async fn scan_respects_bounds_and_limit() {
        let kv = MemoryKv::new();
        kv.write_batch(vec![put("a1", ""), put("a2", ""), put("a3", ""), put("b1", "")])
            .await
            .unwrap();

        let rows = kv
            .scan(
                Bound::Excluded(b"a1".to_vec()),
                Bound::Excluded(b"a\xff".to_vec()),
                10,
            )
            .await
            .unwrap();
        let keys: Vec<_> = rows.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a2".to_vec(), b"a3".to_vec()]);

        let rows = kv
            .scan(Bound::Included(b"a".to_vec()), Bound::Unbounded, 1)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // Inverted bounds yield nothing instead of panicking.
        let rows = kv
            .scan(Bound::Included(b"c".to_vec()), Bound::Excluded(b"a".to_vec()), 5)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
