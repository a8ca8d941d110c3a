use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{EvmAddress, LegSide};

/// What happens when a leg has no resolvable price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPricePolicy {
    /// Fail the run with an incomplete-valuation error; nothing is persisted.
    #[default]
    Abort,
    /// Exclude the leg from totals and list it under `raw_breakdown.omissions`.
    Omit,
}

/// Where a leg's reference-asset price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    /// Attached to the balance by the portfolio provider.
    Inline,
    /// Looked up from the price service.
    Lookup,
    /// The leg is the reference asset itself (price 1).
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAsset {
    pub ticker: String,
    pub coingecko_id: String,
    pub price_usd: Decimal,
}

/// One valued token leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub token_id: String,
    pub chain_id: String,
    pub symbol: String,
    pub side: LegSide,
    pub quantity: Decimal,
    /// Price in reference-asset units.
    pub price: Decimal,
    pub price_origin: PriceOrigin,
    /// Signed value in reference-asset units (negative for debt).
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub key: String,
    pub protocol_id: String,
    pub protocol_name: String,
    pub chain_id: String,
    pub pool_id: String,
    pub label: String,
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_usd_value: Option<Decimal>,
    pub legs: Vec<LineItem>,
}

/// A leg left out of the total because it had no price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Omission {
    /// `spot.<chain>` or the owning position's key.
    pub location: String,
    pub token_id: String,
    pub chain_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionTotal {
    pub key: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub spot: Vec<LineItem>,
    pub protocols: Vec<PositionValuation>,
    /// Non-zero holdings by key, largest first.
    pub positions: Vec<PositionTotal>,
    pub network_totals: BTreeMap<String, Decimal>,
    pub omissions: Vec<Omission>,
}

/// The persisted result of one pipeline run. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub wallet_address: EvmAddress,
    pub vault_address: EvmAddress,
    pub chain_id: String,
    pub reference_asset_ticker: String,
    pub reference_asset: ReferenceAsset,
    pub total_value_reference_asset: Decimal,
    pub total_value_usd: Decimal,
    pub nav_per_share: Decimal,
    pub share_price_usd: Decimal,
    /// Raw `totalSupply()` in base units, as a decimal string.
    pub total_supply: String,
    pub share_decimals: u8,
    pub supply_block: u64,
    pub valuation_policy: UnresolvedPricePolicy,
    pub raw_breakdown: Breakdown,
}

impl NavRecord {
    pub fn is_complete(&self) -> bool {
        self.raw_breakdown.omissions.is_empty()
    }
}
