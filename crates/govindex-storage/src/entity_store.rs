//! Entity store over any [`KvStore`].
//!
//! Each flush is a single `write_batch`, so the `latest` pointer, reducer
//! checkpoints, entity values and index entries always move together.

use std::ops::Bound;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use govindex_core::entity::{EntityDefinitions, EntityUpdates, EntityWithMetadata};
use govindex_core::error::IndexerError;
use govindex_core::keys;
use govindex_core::store::{
    EntityStore, IndexScan, IndexedEntity, ReadOnlyEntityStore, ReducerCheckpoint, ScanPosition,
};
use govindex_core::types::BlockIdentifier;

use crate::kv::{BatchOp, KvStore};

/// Keys fetched per scan request when none is configured.
pub const DEFAULT_SCAN_CHUNK: usize = 256;

/// [`EntityStore`] implementation that lays entities, indexes and
/// checkpoints out in one ordered key space.
pub struct KvEntityStore<K> {
    kv: K,
    scan_chunk: usize,
}

impl<K: KvStore> KvEntityStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            scan_chunk: DEFAULT_SCAN_CHUNK,
        }
    }

    /// Keys pulled from the backend per scan request (minimum 1).
    pub fn with_scan_chunk(mut self, scan_chunk: usize) -> Self {
        self.scan_chunk = scan_chunk.max(1);
        self
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn scan_chunks(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> BoxStream<'_, Result<Vec<(Vec<u8>, Vec<u8>)>, IndexerError>> {
        let chunk = self.scan_chunk;
        stream::try_unfold(Some(lower), move |lower| {
            let upper = upper.clone();
            async move {
                let Some(lower) = lower else {
                    return Ok(None);
                };
                let rows = self.kv.scan(lower, upper, chunk).await?;
                let next = match rows.last() {
                    Some((key, _)) if rows.len() == chunk => Some(Bound::Excluded(key.clone())),
                    _ => None,
                };
                if rows.is_empty() {
                    return Ok(None);
                }
                Ok(Some((rows, next)))
            }
        })
        .boxed()
    }

    async fn resolve_index_rows(
        &self,
        entity: &str,
        base_len: usize,
        rows: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<Vec<IndexedEntity>, IndexerError> {
        let mut entries = Vec::with_capacity(rows.len());
        let mut entity_keys = Vec::with_capacity(rows.len());
        for (key, id) in rows {
            let entity_id = String::from_utf8(id)
                .map_err(|e| IndexerError::Storage(format!("index value is not UTF-8: {e}")))?;
            let index_key = keys::index_sort_value(&key, base_len, &entity_id)?;
            entity_keys.push(keys::entity_key(entity, &entity_id)?);
            entries.push((index_key, entity_id));
        }

        let values = self.kv.get_many(&entity_keys).await?;
        entries
            .into_iter()
            .zip(values)
            .map(|((index_key, entity_id), value)| -> Result<_, IndexerError> {
                let value = value.ok_or_else(|| {
                    IndexerError::Storage(format!(
                        "index entry {index_key:?} points at missing {entity} {entity_id}"
                    ))
                })?;
                Ok(IndexedEntity {
                    index_key,
                    entity_id,
                    value: serde_json::from_slice(&value)?,
                })
            })
            .collect()
    }
}

/// Bounds of an index scan over keys starting with `base`.
fn index_bounds(base: &[u8], scan: &IndexScan) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let mut prefix = base.to_vec();
    prefix.extend_from_slice(scan.prefix.as_deref().unwrap_or_default().as_bytes());
    let upper = Bound::Excluded(keys::prefix_end(&prefix));

    let lower = match &scan.starting {
        Some(ScanPosition {
            index_key,
            entity_id,
        }) => {
            let mut start = base.to_vec();
            start.extend_from_slice(index_key.as_bytes());
            match entity_id {
                Some(id) => {
                    start.push(keys::SEPARATOR);
                    start.extend_from_slice(id.as_bytes());
                    if start < prefix {
                        Bound::Included(prefix)
                    } else {
                        Bound::Excluded(start)
                    }
                }
                None if start < prefix => Bound::Included(prefix),
                None => Bound::Included(start),
            }
        }
        None => Bound::Included(prefix),
    };
    (lower, upper)
}

fn decode_entity_row((key, raw): (Vec<u8>, Vec<u8>)) -> Result<EntityWithMetadata, IndexerError> {
    let key = keys::parse_entity_key(&key)?;
    Ok(EntityWithMetadata {
        entity: key.entity,
        id: key.id,
        value: serde_json::from_slice(&raw)?,
    })
}

fn failed<'a, T: Send + 'a>(err: IndexerError) -> BoxStream<'a, Result<T, IndexerError>> {
    stream::once(async move { Err(err) }).boxed()
}

#[async_trait]
impl<K: KvStore> ReadOnlyEntityStore for KvEntityStore<K> {
    async fn get_finalized_block(&self) -> Result<Option<BlockIdentifier>, IndexerError> {
        match self.kv.get(keys::LATEST_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_reducer_checkpoint(
        &self,
        reducer: &str,
    ) -> Result<Option<ReducerCheckpoint>, IndexerError> {
        let key = keys::reducer_checkpoint_key(reducer)?;
        match self.kv.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn get_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError> {
        let key = keys::entity_key(entity, id)?;
        match self.kv.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn get_entities(&self) -> BoxStream<'_, Result<EntityWithMetadata, IndexerError>> {
        let prefix = keys::entity_prefix();
        let upper = Bound::Excluded(keys::prefix_end(&prefix));
        self.scan_chunks(Bound::Included(prefix), upper)
            .map_ok(|rows| stream::iter(rows.into_iter().map(decode_entity_row)))
            .try_flatten()
            .boxed()
    }

    fn get_entities_by_index<'a>(
        &'a self,
        entity: &'a str,
        index: &'a str,
        scan: IndexScan,
    ) -> BoxStream<'a, Result<IndexedEntity, IndexerError>> {
        let base = match keys::index_base(entity, index) {
            Ok(base) => base,
            Err(e) => return failed(e),
        };
        let (lower, upper) = index_bounds(&base, &scan);
        let base_len = base.len();
        self.scan_chunks(lower, upper)
            .and_then(move |rows| self.resolve_index_rows(entity, base_len, rows))
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

#[async_trait]
impl<K: KvStore> EntityStore for KvEntityStore<K> {
    async fn flush_updates(
        &self,
        block: &BlockIdentifier,
        definitions: &EntityDefinitions,
        updates: EntityUpdates,
    ) -> Result<(), IndexerError> {
        let staged: Vec<_> = updates.entities().collect();
        let entity_keys = staged
            .iter()
            .map(|(key, _)| keys::entity_key(&key.entity, &key.id))
            .collect::<Result<Vec<_>, _>>()?;
        let current = self.kv.get_many(&entity_keys).await?;

        let mut ops = Vec::new();
        let mut written = 0usize;
        for ((key, value), (entity_key, old_raw)) in
            staged.iter().zip(entity_keys.into_iter().zip(current))
        {
            let new_raw = serde_json::to_vec(value)?;
            if old_raw.as_deref() == Some(new_raw.as_slice()) {
                continue;
            }
            let old_value: Option<Value> = old_raw
                .map(|raw| serde_json::from_slice(&raw))
                .transpose()?;

            for index in definitions.indexes_for(&key.entity) {
                let new_sort = index.key_for(value)?;
                if let Some(old_value) = &old_value {
                    let old_sort = index.key_for(old_value)?;
                    if old_sort != new_sort {
                        ops.push(BatchOp::delete(keys::index_key(
                            &key.entity,
                            &index.name,
                            &old_sort,
                            &key.id,
                        )?));
                    }
                }
                ops.push(BatchOp::put(
                    keys::index_key(&key.entity, &index.name, &new_sort, &key.id)?,
                    key.id.as_bytes().to_vec(),
                ));
            }
            ops.push(BatchOp::put(entity_key, new_raw));
            written += 1;
        }

        let mut reducers = 0usize;
        for (reducer, state) in updates.reducer_states() {
            let checkpoint = ReducerCheckpoint {
                state: state.clone(),
                block: block.clone(),
            };
            ops.push(BatchOp::put(
                keys::reducer_checkpoint_key(reducer)?,
                serde_json::to_vec(&checkpoint)?,
            ));
            reducers += 1;
        }
        let finalized = updates.finalized().resolve(block);
        if let Some(finalized) = finalized {
            ops.push(BatchOp::put(
                keys::LATEST_KEY.to_vec(),
                serde_json::to_vec(finalized)?,
            ));
        }

        let op_count = ops.len();
        self.kv.write_batch(ops).await?;
        debug!(
            block = block.number,
            finalized = finalized.map(|b| b.number),
            entities = written,
            unchanged = staged.len() - written,
            reducers,
            ops = op_count,
            "flush committed"
        );
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
