//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockIdentifier ─────────────────────────────────────────────────────────

/// Marks how far replay has progressed.
///
/// Stored both as a reducer's resume checkpoint and as the global `latest`
/// pointer written by every flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdentifier {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`), when the caller knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl BlockIdentifier {
    pub fn number(number: u64) -> Self {
        Self { number, hash: None }
    }

    /// The first block that has not been applied yet.
    pub fn next_block(&self) -> u64 {
        self.number + 1
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// `eth_getLogs` filter: one contract address plus topic alternatives.
///
/// `topics[0]` lists the accepted event signature hashes; later positions are
/// rarely used by reducers but are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Vec<String>>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            address: addr.into(),
            topics: vec![],
        }
    }

    /// Accept any of `topics` in position 0 (event signature hash).
    pub fn topic0(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        let topics: Vec<String> = topics.into_iter().collect();
        if self.topics.is_empty() {
            self.topics.push(topics);
        } else {
            self.topics[0] = topics;
        }
        self
    }

    /// Returns `true` if `log` was emitted by the filtered address and carries
    /// an accepted topic0.
    pub fn matches(&self, log: &RawLog) -> bool {
        if !self.address.eq_ignore_ascii_case(&log.address) {
            return false;
        }
        match (self.topics.first(), log.topics.first()) {
            (None, _) => true,
            (Some(accepted), _) if accepted.is_empty() => true,
            (Some(accepted), Some(topic0)) => {
                accepted.iter().any(|t| t.eq_ignore_ascii_case(topic0))
            }
            (Some(_), None) => false,
        }
    }
}

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// `(block, log index)`: the order logs must be applied in.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number_u64(), self.log_index_u32())
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Format a block number as a JSON-RPC quantity.
pub fn to_hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
