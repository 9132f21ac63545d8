//! Reducer contract: how a contract's logs fold into an accumulator and how
//! that accumulator projects into store entities.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use govindex_core::entity::{EntityDefinition, EntityDefinitions, EntityWithMetadata};
use govindex_core::error::{IndexerError, ReduceError};
use govindex_core::handler::{ContractEvent, HandlerRegistry};
use govindex_core::store::EntityStore;
use govindex_core::types::{LogFilter, RawLog};

use crate::abi::event_topic;
use crate::fetcher::LogFetcher;
use crate::replay::{self, PassReport};

/// A deterministic fold over one contract's logs.
///
/// Handlers are plain functions registered per event signature. They must not
/// perform IO, and must return an error before mutating anything when an
/// event contradicts the accumulator.
pub trait Reducer: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Send + Sync;
    type Event: ContractEvent + Send;

    fn name(&self) -> &str;

    /// Contract address (`0x…`).
    fn address(&self) -> String;

    /// First block worth scanning, usually the deployment block.
    fn starting_block(&self) -> u64;

    fn initial_state(&self) -> Self::State;

    fn handlers(&self) -> &HandlerRegistry<Self::State, Self::Event>;

    /// Turn a raw log into a typed event.
    fn decode_log(&self, log: &RawLog) -> Result<Self::Event, ReduceError>;

    /// Entity types this reducer writes, with their indexes.
    fn entity_definitions(&self) -> Vec<EntityDefinition>;

    /// Project the accumulator into store entities.
    fn entities(&self, state: &Self::State) -> Result<Vec<EntityWithMetadata>, IndexerError>;

    fn encode_state(&self, state: &Self::State) -> Result<Value, IndexerError> {
        Ok(serde_json::to_value(state)?)
    }

    fn decode_state(&self, value: Value) -> Result<Self::State, IndexerError> {
        Ok(serde_json::from_value(value)?)
    }

    /// `eth_getLogs` filter: the contract address and every registered
    /// signature's topic.
    fn filter(&self) -> LogFilter {
        LogFilter::address(self.address()).topic0(self.handlers().signatures().map(event_topic))
    }
}

/// Object-safe view of a [`Reducer`], so reducers with different state and
/// event types can run side by side.
#[async_trait]
pub trait ReducerPass: Send + Sync {
    fn name(&self) -> &str;
    fn starting_block(&self) -> u64;
    fn filter(&self) -> LogFilter;
    fn entity_definitions(&self) -> Vec<EntityDefinition>;

    /// Replay from the stored checkpoint (or the starting block) through
    /// `target` and flush the result.
    ///
    /// `peers` names the reducers sharing the store; `latest` never moves
    /// past the slowest of their checkpoints.
    async fn run_pass(
        &self,
        fetcher: &LogFetcher,
        store: &dyn EntityStore,
        definitions: &EntityDefinitions,
        peers: &[&str],
        target: u64,
    ) -> Result<PassReport, IndexerError>;
}

#[async_trait]
impl<R: Reducer> ReducerPass for R {
    fn name(&self) -> &str {
        Reducer::name(self)
    }

    fn starting_block(&self) -> u64 {
        Reducer::starting_block(self)
    }

    fn filter(&self) -> LogFilter {
        Reducer::filter(self)
    }

    fn entity_definitions(&self) -> Vec<EntityDefinition> {
        Reducer::entity_definitions(self)
    }

    async fn run_pass(
        &self,
        fetcher: &LogFetcher,
        store: &dyn EntityStore,
        definitions: &EntityDefinitions,
        peers: &[&str],
        target: u64,
    ) -> Result<PassReport, IndexerError> {
        replay::replay_reducer(self, fetcher, store, definitions, peers, target).await
    }
}

/// Serialize ordered maps as `[key, value]` pair lists.
///
/// JSON objects only allow string keys, and a pair list keeps the stored
/// accumulator byte-stable across runs.
pub mod as_pairs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: DeserializeOwned + Ord,
        V: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(K, V)> = serde::Deserialize::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
