//! Entity store traits: the read surface used by query layers and the single
//! write path used by the replay engine.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityDefinitions, EntityUpdates, EntityWithMetadata};
use crate::error::IndexerError;
use crate::types::BlockIdentifier;

/// A reducer's persisted accumulator and the block it reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerCheckpoint {
    pub state: Value,
    pub block: BlockIdentifier,
}

/// Position inside an index: a sort value plus, optionally, the entity id of
/// the entry at that position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPosition {
    pub index_key: String,
    pub entity_id: Option<String>,
}

/// Bounds for an index scan.
///
/// `prefix` restricts results to sort values starting with it. `starting`
/// resumes the scan: with an `entity_id` the named entry is excluded, without
/// one every entry at `index_key` is included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexScan {
    pub prefix: Option<String>,
    pub starting: Option<ScanPosition>,
}

impl IndexScan {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            starting: None,
        }
    }

    /// Resume strictly after the entry `(index_key, entity_id)`.
    pub fn after(mut self, index_key: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.starting = Some(ScanPosition {
            index_key: index_key.into(),
            entity_id: Some(entity_id.into()),
        });
        self
    }

    /// Resume at the first entry whose sort value is `index_key` or greater.
    pub fn from_key(mut self, index_key: impl Into<String>) -> Self {
        self.starting = Some(ScanPosition {
            index_key: index_key.into(),
            entity_id: None,
        });
        self
    }
}

/// One entry returned by an index scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntity {
    pub index_key: String,
    pub entity_id: String,
    pub value: Value,
}

/// Read operations. Not-found is `Ok(None)`, never an error.
#[async_trait]
pub trait ReadOnlyEntityStore: Send + Sync {
    /// The block every reducer has been flushed through.
    ///
    /// The replay engine keeps this at the slowest reducer checkpoint, so it
    /// stays `None` until each reducer has committed once.
    async fn get_finalized_block(&self) -> Result<Option<BlockIdentifier>, IndexerError>;

    async fn get_reducer_checkpoint(
        &self,
        reducer: &str,
    ) -> Result<Option<ReducerCheckpoint>, IndexerError>;

    async fn get_entity(&self, entity: &str, id: &str) -> Result<Option<Value>, IndexerError>;

    /// Every entity, ordered by `(type, id)` key bytes.
    fn get_entities(&self) -> BoxStream<'_, Result<EntityWithMetadata, IndexerError>>;

    /// Entries of one index, ordered by `(sort value, id)`.
    fn get_entities_by_index<'a>(
        &'a self,
        entity: &'a str,
        index: &'a str,
        scan: IndexScan,
    ) -> BoxStream<'a, Result<IndexedEntity, IndexerError>>;
}

/// The write path. One call is one atomic commit.
#[async_trait]
pub trait EntityStore: ReadOnlyEntityStore {
    /// Persist `updates` and move `latest` as [`EntityUpdates::finalized`]
    /// asks (to `block` unless told otherwise).
    ///
    /// Index entries of replaced values are retired and those of the new
    /// values installed in the same batch; each reducer state in `updates` is
    /// stored as that reducer's checkpoint at `block`.
    async fn flush_updates(
        &self,
        block: &BlockIdentifier,
        definitions: &EntityDefinitions,
        updates: EntityUpdates,
    ) -> Result<(), IndexerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_builders() {
        let scan = IndexScan::prefix("00ff").after("00ff01", "7");
        assert_eq!(scan.prefix.as_deref(), Some("00ff"));
        assert_eq!(
            scan.starting,
            Some(ScanPosition {
                index_key: "00ff01".into(),
                entity_id: Some("7".into()),
            })
        );
        assert_eq!(IndexScan::default().from_key("a").starting.unwrap().entity_id, None);
    }

    #[test]
    fn checkpoint_serializes_state_and_block() {
        let cp = ReducerCheckpoint {
            state: serde_json::json!({ "totalSupply": "0x0" }),
            block: BlockIdentifier::number(7),
        };
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["block"]["number"], 7);
        assert_eq!(serde_json::from_value::<ReducerCheckpoint>(json).unwrap(), cp);
    }
}
