//! Event ABI tables and raw-log decoding.
//!
//! Indexed parameters are read from `topics[1..]`, the rest from `data` as an
//! ABI-encoded parameter sequence. Only value types appear indexed in the
//! events decoded here.

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, U256};
use tiny_keccak::{Hasher, Keccak};

use govindex_core::error::ReduceError;
use govindex_core::types::RawLog;

/// One parameter of an event declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventParam {
    pub name: &'static str,
    pub ty: &'static str,
    pub indexed: bool,
}

impl EventParam {
    pub const fn indexed(name: &'static str, ty: &'static str) -> Self {
        Self {
            name,
            ty,
            indexed: true,
        }
    }

    pub const fn data(name: &'static str, ty: &'static str) -> Self {
        Self {
            name,
            ty,
            indexed: false,
        }
    }
}

/// An event declaration: canonical signature plus parameter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAbi {
    pub signature: &'static str,
    pub params: &'static [EventParam],
}

impl EventAbi {
    /// `0x`-prefixed keccak256 of the signature.
    pub fn topic0(&self) -> String {
        event_topic(self.signature)
    }

    pub fn matches(&self, log: &RawLog) -> bool {
        log.topics
            .first()
            .is_some_and(|t| t.eq_ignore_ascii_case(&self.topic0()))
    }

    /// Decode `log` against this declaration.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedLog, ReduceError> {
        let indexed: Vec<&EventParam> = self.params.iter().filter(|p| p.indexed).collect();
        let data: Vec<&EventParam> = self.params.iter().filter(|p| !p.indexed).collect();

        if log.topics.len() != indexed.len() + 1 {
            return Err(ReduceError::Decode(format!(
                "{}: expected {} topics, got {}",
                self.signature,
                indexed.len() + 1,
                log.topics.len()
            )));
        }

        let mut fields = Vec::with_capacity(self.params.len());
        for (param, topic) in indexed.iter().zip(&log.topics[1..]) {
            let ty = parse_type(param)?;
            let bytes = decode_hex(topic)?;
            let value = ty
                .abi_decode(&bytes)
                .map_err(|e| ReduceError::Decode(format!("topic {}: {e}", param.name)))?;
            fields.push((param.name, value));
        }

        if !data.is_empty() {
            let types = data
                .iter()
                .map(|p| parse_type(p))
                .collect::<Result<Vec<_>, _>>()?;
            let bytes = decode_hex(&log.data)?;
            let decoded = DynSolType::Tuple(types)
                .abi_decode_params(&bytes)
                .map_err(|e| ReduceError::Decode(format!("{} data: {e}", self.signature)))?;
            let values = match decoded {
                DynSolValue::Tuple(values) => values,
                other => vec![other],
            };
            fields.extend(data.iter().map(|p| p.name).zip(values));
        }

        Ok(DecodedLog {
            signature: self.signature,
            fields,
        })
    }
}

/// Find the declaration whose topic0 matches `log`.
pub fn find_event<'a>(events: &'a [EventAbi], log: &RawLog) -> Option<&'a EventAbi> {
    events.iter().find(|e| e.matches(log))
}

/// Compute the `0x`-prefixed keccak256 topic of an event signature.
pub fn event_topic(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

fn parse_type(param: &EventParam) -> Result<DynSolType, ReduceError> {
    DynSolType::parse(param.ty)
        .map_err(|e| ReduceError::Decode(format!("type {} of {}: {e}", param.ty, param.name)))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, ReduceError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| ReduceError::Decode(format!("invalid hex: {e}")))
}

/// Named values of a decoded log, with typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub signature: &'static str,
    fields: Vec<(&'static str, DynSolValue)>,
}

impl DecodedLog {
    fn field(&self, name: &str) -> Result<&DynSolValue, ReduceError> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| ReduceError::Decode(format!("{}: no field {name}", self.signature)))
    }

    fn mismatch(&self, name: &str, expected: &str) -> ReduceError {
        ReduceError::Decode(format!("{}: field {name} is not {expected}", self.signature))
    }

    pub fn address(&self, name: &str) -> Result<Address, ReduceError> {
        self.field(name)?
            .as_address()
            .ok_or_else(|| self.mismatch(name, "an address"))
    }

    pub fn uint(&self, name: &str) -> Result<U256, ReduceError> {
        self.field(name)?
            .as_uint()
            .map(|(v, _)| v)
            .ok_or_else(|| self.mismatch(name, "an unsigned integer"))
    }

    pub fn uint8(&self, name: &str) -> Result<u8, ReduceError> {
        let v = self.uint(name)?;
        if v > U256::from(u8::MAX) {
            return Err(self.mismatch(name, "a uint8"));
        }
        Ok(v.to::<u8>())
    }

    pub fn string(&self, name: &str) -> Result<String, ReduceError> {
        self.field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(name, "a string"))
    }

    fn array(&self, name: &str) -> Result<&[DynSolValue], ReduceError> {
        self.field(name)?
            .as_array()
            .ok_or_else(|| self.mismatch(name, "an array"))
    }

    pub fn addresses(&self, name: &str) -> Result<Vec<Address>, ReduceError> {
        self.array(name)?
            .iter()
            .map(|v| v.as_address().ok_or_else(|| self.mismatch(name, "address[]")))
            .collect()
    }

    pub fn uints(&self, name: &str) -> Result<Vec<U256>, ReduceError> {
        self.array(name)?
            .iter()
            .map(|v| {
                v.as_uint()
                    .map(|(u, _)| u)
                    .ok_or_else(|| self.mismatch(name, "uint256[]"))
            })
            .collect()
    }

    pub fn strings(&self, name: &str) -> Result<Vec<String>, ReduceError> {
        self.array(name)?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.mismatch(name, "string[]"))
            })
            .collect()
    }

    /// `bytes[]` rendered as `0x`-prefixed hex.
    pub fn bytes_hex(&self, name: &str) -> Result<Vec<String>, ReduceError> {
        self.array(name)?
            .iter()
            .map(|v| {
                v.as_bytes()
                    .map(|b| format!("0x{}", hex::encode(b)))
                    .ok_or_else(|| self.mismatch(name, "bytes[]"))
            })
            .collect()
    }
}
