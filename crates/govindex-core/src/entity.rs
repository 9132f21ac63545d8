//! Entities, index definitions, and the pending-update set a pass flushes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IndexerError;
use crate::types::BlockIdentifier;

/// Stable compound key identifying one logical row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// The unit exchanged between reducers, readers and the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWithMetadata {
    pub entity: String,
    pub id: String,
    pub value: Value,
}

impl EntityWithMetadata {
    /// Serialize `value` into an entity of type `entity`.
    pub fn new<T: Serialize>(
        entity: impl Into<String>,
        id: impl Into<String>,
        value: &T,
    ) -> Result<Self, IndexerError> {
        Ok(Self {
            entity: entity.into(),
            id: id.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity, &self.id)
    }

    /// Deserialize the value into its typed form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, IndexerError> {
        Ok(T::deserialize(&self.value)?)
    }
}

// ─── Index definitions ───────────────────────────────────────────────────────

type IndexKeyFn = Arc<dyn Fn(&Value) -> Result<String, IndexerError> + Send + Sync>;

/// A named secondary index: computes an ordered sort string from an entity.
///
/// Sort strings should be built with [`crate::sort_key`] so lexicographic
/// byte order matches the intended value order.
#[derive(Clone)]
pub struct IndexDefinition {
    pub name: String,
    key: IndexKeyFn,
}

impl IndexDefinition {
    pub fn new<F>(name: impl Into<String>, key: F) -> Self
    where
        F: Fn(&Value) -> Result<String, IndexerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: Arc::new(key),
        }
    }

    /// Index over a typed entity; the stored JSON is deserialized into `T`
    /// before `key` runs.
    pub fn typed<T: DeserializeOwned + 'static>(name: impl Into<String>, key: fn(&T) -> String) -> Self {
        Self::new(name, move |value| {
            let typed = T::deserialize(value)?;
            Ok(key(&typed))
        })
    }

    /// Compute the sort string for `value`.
    pub fn key_for(&self, value: &Value) -> Result<String, IndexerError> {
        (self.key)(value)
    }
}

impl fmt::Debug for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Declares an entity type and the indexes maintained for it.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub name: String,
    pub indexes: Vec<IndexDefinition>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: vec![],
        }
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

/// All entity definitions known to a flush, keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct EntityDefinitions {
    definitions: BTreeMap<String, EntityDefinition>,
}

impl EntityDefinitions {
    /// Merge definitions from several reducers. Later definitions of the same
    /// entity type replace earlier ones.
    pub fn combine(definitions: impl IntoIterator<Item = EntityDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, entity: &str) -> Option<&EntityDefinition> {
        self.definitions.get(entity)
    }

    /// Indexes for `entity`; empty when the type declares none or is unknown.
    pub fn indexes_for(&self, entity: &str) -> &[IndexDefinition] {
        self.definitions
            .get(entity)
            .map(|d| d.indexes.as_slice())
            .unwrap_or(&[])
    }

    /// Look up one index, failing if either the entity or the index is unknown.
    pub fn index(&self, entity: &str, index: &str) -> Option<&IndexDefinition> {
        self.indexes_for(entity).iter().find(|i| i.name == index)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ─── Pending updates ─────────────────────────────────────────────────────────

/// What a flush does with the `latest` pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FinalizedUpdate {
    /// Move it to the flush block.
    #[default]
    FlushBlock,
    /// Move it to this block, which may trail the flush block.
    Block(BlockIdentifier),
    /// Leave it where it is.
    Keep,
}

impl FinalizedUpdate {
    /// The block `latest` ends up at after a flush at `flush_block`, or
    /// `None` when it is left untouched.
    pub fn resolve<'a>(&'a self, flush_block: &'a BlockIdentifier) -> Option<&'a BlockIdentifier> {
        match self {
            Self::FlushBlock => Some(flush_block),
            Self::Block(block) => Some(block),
            Self::Keep => None,
        }
    }
}

/// Everything one flush writes: entity values, serialized reducer
/// accumulators and what happens to the `latest` pointer.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdates {
    entities: BTreeMap<EntityKey, Value>,
    reducer_states: BTreeMap<String, Value>,
    finalized: FinalizedUpdate,
}

impl EntityUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an entity value. A later put for the same key wins.
    pub fn put(&mut self, entity: EntityWithMetadata) {
        self.entities
            .insert(EntityKey::new(entity.entity, entity.id), entity.value);
    }

    /// Stage a reducer's serialized accumulator; it is written together with
    /// the flush block as that reducer's checkpoint.
    pub fn put_reducer_state(&mut self, reducer: impl Into<String>, state: Value) {
        self.reducer_states.insert(reducer.into(), state);
    }

    /// Point `latest` at `block` instead of the flush block.
    pub fn finalize_at(&mut self, block: BlockIdentifier) {
        self.finalized = FinalizedUpdate::Block(block);
    }

    /// Leave `latest` untouched.
    pub fn keep_finalized(&mut self) {
        self.finalized = FinalizedUpdate::Keep;
    }

    pub fn finalized(&self) -> &FinalizedUpdate {
        &self.finalized
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityKey, &Value)> {
        self.entities.iter()
    }

    pub fn reducer_states(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.reducer_states.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.reducer_states.is_empty()
    }
}

impl Extend<EntityWithMetadata> for EntityUpdates {
    fn extend<I: IntoIterator<Item = EntityWithMetadata>>(&mut self, iter: I) {
        for entity in iter {
            self.put(entity);
        }
    }
}

impl FromIterator<EntityWithMetadata> for EntityUpdates {
    fn from_iter<I: IntoIterator<Item = EntityWithMetadata>>(iter: I) -> Self {
        let mut updates = Self::new();
        updates.extend(iter);
        updates
    }
}
