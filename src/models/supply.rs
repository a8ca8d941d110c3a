use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::EvmAddress;
use crate::error::NavError;

/// Vault share supply read from chain, pinned to a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultShareSupply {
    pub vault_address: EvmAddress,
    pub chain_id: String,
    /// Raw `totalSupply()` in base units.
    #[serde(with = "u128_string")]
    pub total_supply: u128,
    pub decimals: u8,
    pub block_number: u64,
    pub read_at: DateTime<Utc>,
}

impl VaultShareSupply {
    /// Whole-share supply, `total_supply / 10^decimals`.
    ///
    /// Supplies past the 96-bit decimal mantissa are an overflow; zero is left
    /// for the caller to reject.
    pub fn shares(&self) -> Result<Decimal, NavError> {
        let raw = i128::try_from(self.total_supply).map_err(|_| {
            NavError::Overflow(format!(
                "share supply {} does not fit a decimal",
                self.total_supply
            ))
        })?;
        Decimal::try_from_i128_with_scale(raw, u32::from(self.decimals)).map_err(|e| {
            NavError::Overflow(format!(
                "share supply {} with {} decimals is out of range: {e}",
                self.total_supply, self.decimals
            ))
        })
    }
}

/// Serializes a `u128` as a decimal string; JSON consumers and BSON both lack
/// a native 128-bit integer.
pub(crate) mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
