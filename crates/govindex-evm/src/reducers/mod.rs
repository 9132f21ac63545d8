//! Shipped reducers for the ENS token and governor contracts.

use std::sync::Arc;

use alloy_primitives::Address;

use crate::reducer::ReducerPass;

pub mod governor;
pub mod token;

pub use governor::{EnsGovernor, GovernorEvent, GovernorState, ProposalStatus};
pub use token::{EnsToken, TokenEvent, TokenState};

/// Every shipped reducer with its mainnet address and deployment block.
pub fn default_reducers() -> Vec<Arc<dyn ReducerPass>> {
    vec![Arc::new(EnsToken::new()), Arc::new(EnsGovernor::new())]
}

/// Lowercase `0x…` rendering used for entity ids and index keys.
pub fn address_id(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// `U256` as a base-10 string, the shape query layers expect for amounts.
pub mod decimal {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Amount(#[serde(with = "decimal")] U256);

    #[test]
    fn decimal_amounts() {
        let big = U256::from(10u64).pow(U256::from(24u64));
        let json = serde_json::to_value(Amount(big)).unwrap();
        assert_eq!(json, serde_json::json!("1000000000000000000000000"));
        assert_eq!(serde_json::from_value::<Amount>(json).unwrap(), Amount(big));
        assert!(serde_json::from_value::<Amount>(serde_json::json!("0x10")).is_err());
    }

    #[test]
    fn address_ids_are_lowercase() {
        let a = address!("C18360217D8F7Ab5e7c516566761Ea12Ce7F9D72");
        assert_eq!(address_id(&a), "0xc18360217d8f7ab5e7c516566761ea12ce7f9d72");
    }

    #[test]
    fn default_reducer_names() {
        let names: Vec<String> = default_reducers().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["ENSToken", "ENSGovernor"]);
    }
}
