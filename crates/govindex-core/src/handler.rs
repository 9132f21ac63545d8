//! Event signature → reduce function registry.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IndexerError, ReduceError};
use crate::types::RawLog;

/// A decoded contract event that knows its canonical signature
/// (e.g. `"Transfer(address,address,uint256)"`).
pub trait ContractEvent {
    fn signature(&self) -> &'static str;
}

/// Applies one event to an accumulator. Must be deterministic and free of IO,
/// and must leave `state` untouched when it returns an error.
pub type ReduceFn<S, E> = fn(&mut S, &E, &RawLog) -> Result<(), ReduceError>;

/// Registry of reduce functions for one reducer, keyed by exact signature.
pub struct HandlerRegistry<S, E> {
    handlers: BTreeMap<&'static str, ReduceFn<S, E>>,
}

impl<S, E: ContractEvent> HandlerRegistry<S, E> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register `handler` for `signature`, replacing any previous one.
    pub fn on(mut self, signature: &'static str, handler: ReduceFn<S, E>) -> Self {
        self.handlers.insert(signature, handler);
        self
    }

    /// Registered signatures, in byte order.
    pub fn signatures(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for `event`.
    ///
    /// The outer error is fatal for the pass (no handler for the signature).
    /// The inner one is a handler failure the caller records before moving on.
    pub fn dispatch(
        &self,
        reducer: &str,
        state: &mut S,
        event: &E,
        log: &RawLog,
    ) -> Result<Result<(), ReduceError>, IndexerError> {
        let signature = event.signature();
        let handler = self
            .handlers
            .get(signature)
            .ok_or_else(|| IndexerError::UnknownSignature {
                reducer: reducer.to_string(),
                signature: signature.to_string(),
            })?;
        Ok(handler(state, event, log))
    }
}

impl<S, E: ContractEvent> Default for HandlerRegistry<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> fmt::Debug for HandlerRegistry<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("signatures", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
