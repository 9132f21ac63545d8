//! Ordered byte-key store contract the entity store is built on.

use std::ops::Bound;

use async_trait::async_trait;

use govindex_core::error::IndexerError;

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::Put { key, value }
    }

    pub fn delete(key: Vec<u8>) -> Self {
        Self::Delete { key }
    }
}

/// Key-value backend with byte-ordered range scans and atomic batches.
///
/// Implementations: [`crate::MemoryKv`] and, with the `sqlite` feature,
/// `SqliteKv`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError>;

    /// Values for `keys`, positionally. Missing keys yield `None`.
    async fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, IndexerError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Up to `limit` entries within `(lower, upper)`, in ascending key order.
    async fn scan(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError>;

    /// Apply every op or none of them.
    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), IndexerError>;
}

/// `true` when no key can satisfy both bounds.
pub(crate) fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    use Bound::*;
    match (lower, upper) {
        (Included(l), Included(u)) => l > u,
        (Included(l), Excluded(u)) | (Excluded(l), Included(u)) | (Excluded(l), Excluded(u)) => {
            l >= u
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ranges() {
        use Bound::*;
        assert!(is_empty_range(&Included(b"b".to_vec()), &Excluded(b"b".to_vec())));
        assert!(is_empty_range(&Excluded(b"c".to_vec()), &Included(b"b".to_vec())));
        assert!(!is_empty_range(&Included(b"b".to_vec()), &Included(b"b".to_vec())));
        assert!(!is_empty_range(&Unbounded, &Excluded(b"a".to_vec())));
    }
}
