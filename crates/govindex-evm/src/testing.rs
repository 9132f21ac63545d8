//! In-crate test doubles: a scripted RPC client and a raw log builder.

use std::collections::VecDeque;
use std::sync::Mutex;

use alloy_core::dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use govindex_core::error::IndexerError;
use govindex_core::types::{to_hex_quantity, LogFilter, RawLog};

use crate::abi::event_topic;
use crate::fetcher::EvmRpcClient;

pub const CONTRACT: &str = "0x00000000000000000000000000000000c0ffee01";

/// `EvmRpcClient` serving logs from memory.
pub struct MockRpcClient {
    head: Mutex<u64>,
    logs: Mutex<Vec<RawLog>>,
    failures: Mutex<VecDeque<fn() -> IndexerError>>,
    max_range: Option<u64>,
    requests: Mutex<Vec<(u64, u64)>>,
}

impl MockRpcClient {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            logs: Mutex::new(vec![]),
            failures: Mutex::new(VecDeque::new()),
            max_range: None,
            requests: Mutex::new(vec![]),
        }
    }

    /// Reject `get_logs` spans wider than `blocks` with `RangeTooLarge`.
    pub fn with_max_range(mut self, blocks: u64) -> Self {
        self.max_range = Some(blocks);
        self
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Fail the next `n` `get_logs` calls with `make()`.
    pub fn fail_next(&self, n: usize, make: fn() -> IndexerError) {
        self.failures.lock().unwrap().extend(std::iter::repeat(make).take(n));
    }

    /// Every `get_logs` range requested so far, failed calls included.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvmRpcClient for MockRpcClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.requests.lock().unwrap().push((from, to));
        if let Some(make) = self.failures.lock().unwrap().pop_front() {
            return Err(make());
        }
        if let Some(max) = self.max_range {
            if to - from + 1 > max {
                return Err(IndexerError::RangeTooLarge {
                    from,
                    to,
                    reason: format!("query exceeds {max} blocks"),
                });
            }
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| (from..=to).contains(&log.block_number_u64()) && filter.matches(log))
            .cloned()
            .collect())
    }
}

/// Builds `RawLog`s in JSON-RPC hex encoding.
pub struct LogBuilder {
    address: String,
    block: u64,
    log_index: u32,
    tx: Option<String>,
    topics: Vec<String>,
    data: Vec<u8>,
    removed: bool,
}

impl LogBuilder {
    pub fn new(block: u64) -> Self {
        Self {
            address: CONTRACT.to_string(),
            block,
            log_index: 0,
            tx: None,
            topics: vec![],
            data: vec![],
            removed: false,
        }
    }

    pub fn log_index(mut self, log_index: u32) -> Self {
        self.log_index = log_index;
        self
    }

    pub fn tx(mut self, tx: impl Into<String>) -> Self {
        self.tx = Some(tx.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn removed(mut self) -> Self {
        self.removed = true;
        self
    }

    /// Topic0 from `signature`, then the given indexed topics, with `data`
    /// ABI-encoded as a parameter sequence.
    pub fn event(mut self, signature: &str, indexed: Vec<String>, data: Vec<DynSolValue>) -> Self {
        self.topics = std::iter::once(event_topic(signature)).chain(indexed).collect();
        self.data = DynSolValue::Tuple(data).abi_encode_params();
        self
    }

    pub fn build(self) -> RawLog {
        let tx = self.tx.unwrap_or_else(|| {
            format!("0x{:064x}", self.block * 1_000 + u64::from(self.log_index))
        });
        RawLog {
            address: self.address,
            topics: self.topics,
            data: format!("0x{}", hex::encode(self.data)),
            block_number: to_hex_quantity(self.block),
            block_hash: format!("0x{:064x}", self.block),
            tx_hash: tx,
            log_index: to_hex_quantity(u64::from(self.log_index)),
            removed: self.removed.then_some(true),
        }
    }
}

/// An address as a 32-byte indexed topic.
pub fn address_topic(address: Address) -> String {
    format!("0x{:0>64}", hex::encode(address))
}

/// A `uint256` as a 32-byte indexed topic.
pub fn uint_topic(value: U256) -> String {
    format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

pub fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}
