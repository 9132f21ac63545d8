//! Error types for the govindex pipeline.

use thiserror::Error;

/// Errors that abort an indexing pass (or a read against the store).
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Provider rejected block range {from}..={to}: {reason}")]
    RangeTooLarge { from: u64, to: u64, reason: String },

    #[error("Giving up after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No handler registered in '{reducer}' for event signature '{signature}'")]
    UnknownSignature { reducer: String, signature: String },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid page request: {0}")]
    InvalidPage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for transient provider errors worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::RateLimited(_) | Self::Timeout { .. }
        )
    }
}

/// Errors raised while applying a single log to an accumulator.
///
/// These never abort a pass: the replay engine records them and moves on to
/// the next log. Handlers return them before mutating any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceError {
    #[error("failed to decode log: {0}")]
    Decode(String),

    #[error("unexpected previous balance for {delegate}: stored {stored}, event says {reported}")]
    PreviousBalanceMismatch {
        delegate: String,
        stored: String,
        reported: String,
    },

    #[error("mismatched from delegate for {delegator}: stored {stored}, event says {reported}")]
    MismatchedFromDelegate {
        delegator: String,
        stored: String,
        reported: String,
    },

    #[error("insufficient balance for {account}: has {balance}, sends {amount}")]
    InsufficientBalance {
        account: String,
        balance: String,
        amount: String,
    },

    #[error("{quantity} would overflow or underflow")]
    Arithmetic { quantity: &'static str },

    #[error("unknown proposal {id}")]
    UnknownProposal { id: String },

    #[error("handler for '{expected}' received a different event")]
    UnexpectedEvent { expected: &'static str },
}
