//! The replay engine: folds each reducer's logs up to a target block and
//! commits the result in one flush.
//!
//! # Pass
//! 1. Resume at checkpoint + 1 (or the reducer's starting block).
//! 2. Restore the accumulator from the checkpoint, or start fresh.
//! 3. Stream log batches up to the target, dispatching each log in order.
//!    Decode and handler failures are recorded, not fatal.
//! 4. Project entities and flush them with the accumulator and target block.

use std::sync::Arc;

use futures::TryStreamExt;
use serde::Serialize;
use tracing::{error, info, warn};

use govindex_core::entity::{EntityDefinitions, EntityUpdates};
use govindex_core::error::{IndexerError, ReduceError};
use govindex_core::handler::ContractEvent;
use govindex_core::indexer::IndexerState;
use govindex_core::store::EntityStore;
use govindex_core::types::BlockIdentifier;

use crate::fetcher::LogFetcher;
use crate::reducer::{Reducer, ReducerPass};

/// A log that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerFailure {
    pub reducer: String,
    pub block: u64,
    pub transaction: String,
    pub log_index: u32,
    /// Index of the batch within the pass.
    pub batch_index: usize,
    /// Index of the log within its batch.
    pub position: usize,
    /// Event signature, when the log decoded far enough to know it.
    pub signature: Option<&'static str>,
    #[serde(serialize_with = "serialize_display")]
    pub error: ReduceError,
}

fn serialize_display<S: serde::Serializer>(e: &ReduceError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

/// What one reducer pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub reducer: String,
    /// First block scanned. Greater than `to` when already up to date.
    pub from: u64,
    pub to: u64,
    pub batches: usize,
    pub logs: usize,
    pub applied: usize,
    pub entities: usize,
    pub failures: Vec<HandlerFailure>,
}

impl PassReport {
    pub fn is_up_to_date(&self) -> bool {
        self.from > self.to
    }
}

/// Final state of one reducer within a run.
#[derive(Debug)]
pub struct PassOutcome {
    pub reducer: String,
    pub state: IndexerState,
    pub result: Result<PassReport, IndexerError>,
}

/// Outcome of [`ReplayEngine::run_once`].
#[derive(Debug)]
pub struct RunReport {
    pub head: u64,
    pub target: u64,
    pub outcomes: Vec<PassOutcome>,
}

impl RunReport {
    /// `true` when every reducer reached [`IndexerState::Done`].
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.state == IndexerState::Done)
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandlerFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flat_map(|r| r.failures.iter())
    }
}

/// Runs every registered reducer against one store.
pub struct ReplayEngine {
    fetcher: LogFetcher,
    store: Arc<dyn EntityStore>,
    reducers: Vec<Arc<dyn ReducerPass>>,
    definitions: EntityDefinitions,
    confirmation_depth: u64,
}

impl ReplayEngine {
    pub fn new(
        fetcher: LogFetcher,
        store: Arc<dyn EntityStore>,
        reducers: Vec<Arc<dyn ReducerPass>>,
        confirmation_depth: u64,
    ) -> Self {
        let definitions =
            EntityDefinitions::combine(reducers.iter().flat_map(|r| r.entity_definitions()));
        Self {
            fetcher,
            store,
            reducers,
            definitions,
            confirmation_depth,
        }
    }

    pub fn definitions(&self) -> &EntityDefinitions {
        &self.definitions
    }

    pub fn reducers(&self) -> &[Arc<dyn ReducerPass>] {
        &self.reducers
    }

    /// Bring every reducer up to `head - confirmation_depth`.
    ///
    /// The head is read once. Reducers run one after another; a fatal error
    /// in one is reported in its outcome and the rest still run.
    pub async fn run_once(&self) -> Result<RunReport, IndexerError> {
        let head = self.fetcher.head().await?;
        let target = head.saturating_sub(self.confirmation_depth);
        info!(head, target, reducers = self.reducers.len(), "starting replay run");

        let mut outcomes = Vec::with_capacity(self.reducers.len());
        for reducer in &self.reducers {
            outcomes.push(self.run_reducer(reducer.as_ref(), target).await);
        }
        Ok(RunReport {
            head,
            target,
            outcomes,
        })
    }

    /// Run a single reducer's pass through `target`.
    pub async fn run_reducer(&self, reducer: &dyn ReducerPass, target: u64) -> PassOutcome {
        let name = reducer.name().to_string();
        info!(reducer = %name, target, "pass started");
        let peers: Vec<&str> = self
            .reducers
            .iter()
            .map(|r| r.name())
            .filter(|peer| *peer != name)
            .collect();
        let result = reducer
            .run_pass(&self.fetcher, self.store.as_ref(), &self.definitions, &peers, target)
            .await;
        let state = match &result {
            Ok(report) => {
                info!(
                    reducer = %name,
                    from = report.from,
                    to = report.to,
                    logs = report.logs,
                    failures = report.failures.len(),
                    "pass done"
                );
                IndexerState::Done
            }
            Err(e) => {
                error!(reducer = %name, error = %e, "pass failed, checkpoint left in place");
                IndexerState::Failed
            }
        };
        PassOutcome {
            reducer: name,
            state,
            result,
        }
    }
}

/// One pass of `reducer` through `target`.
///
/// The flush moves `latest` to the lowest checkpoint among `reducer` and
/// `peers`, and leaves it alone while any peer has never been flushed.
pub async fn replay_reducer<R: Reducer>(
    reducer: &R,
    fetcher: &LogFetcher,
    store: &dyn EntityStore,
    definitions: &EntityDefinitions,
    peers: &[&str],
    target: u64,
) -> Result<PassReport, IndexerError> {
    let name = Reducer::name(reducer);
    let (mut state, from) = match store.get_reducer_checkpoint(name).await? {
        Some(checkpoint) => {
            info!(reducer = name, block = checkpoint.block.number, "resuming from checkpoint");
            let from = checkpoint.block.next_block();
            (reducer.decode_state(checkpoint.state)?, from)
        }
        None => (reducer.initial_state(), Reducer::starting_block(reducer)),
    };

    let mut report = PassReport {
        reducer: name.to_string(),
        from,
        to: target,
        batches: 0,
        logs: 0,
        applied: 0,
        entities: 0,
        failures: vec![],
    };
    if from > target {
        info!(reducer = name, from, target, "already up to date");
        return Ok(report);
    }

    let mut batches = fetcher.logs(Reducer::filter(reducer), from, target);
    while let Some(batch) = batches.try_next().await? {
        for (position, log) in batch.logs.iter().enumerate() {
            report.logs += 1;
            let outcome = match reducer.decode_log(log) {
                Ok(event) => {
                    let signature = event.signature();
                    reducer
                        .handlers()
                        .dispatch(name, &mut state, &event, log)?
                        .map_err(|e| (Some(signature), e))
                }
                Err(e) => Err((None, e)),
            };
            match outcome {
                Ok(()) => report.applied += 1,
                Err((signature, e)) => {
                    let failure = HandlerFailure {
                        reducer: name.to_string(),
                        block: log.block_number_u64(),
                        transaction: log.tx_hash.clone(),
                        log_index: log.log_index_u32(),
                        batch_index: report.batches,
                        position,
                        signature,
                        error: e,
                    };
                    error!(
                        reducer = name,
                        block = failure.block,
                        tx = %failure.transaction,
                        log_index = failure.log_index,
                        batch = failure.batch_index,
                        position,
                        signature = signature.unwrap_or("<undecoded>"),
                        error = %failure.error,
                        "handler failed, skipping log"
                    );
                    report.failures.push(failure);
                }
            }
        }
        report.batches += 1;
    }
    drop(batches);

    let entities = reducer.entities(&state)?;
    report.entities = entities.len();
    let mut updates: EntityUpdates = entities.into_iter().collect();
    updates.put_reducer_state(name, reducer.encode_state(&state)?);
    match slowest_checkpoint(store, peers, target).await? {
        Some(block) if block == target => {}
        Some(block) => updates.finalize_at(BlockIdentifier::number(block)),
        None => updates.keep_finalized(),
    }
    store
        .flush_updates(&BlockIdentifier::number(target), definitions, updates)
        .await?;

    if !report.failures.is_empty() {
        warn!(reducer = name, failures = report.failures.len(), "pass finished with handler failures");
    }
    Ok(report)
}

/// Lowest checkpoint block among `peers`, capped at `target`. `None` while
/// some peer has no checkpoint.
async fn slowest_checkpoint(
    store: &dyn EntityStore,
    peers: &[&str],
    target: u64,
) -> Result<Option<u64>, IndexerError> {
    let mut slowest = target;
    for peer in peers {
        match store.get_reducer_checkpoint(peer).await? {
            Some(checkpoint) => slowest = slowest.min(checkpoint.block.number),
            None => return Ok(None),
        }
    }
    Ok(Some(slowest))
}
