use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::EvmAddress;

/// How a leg contributes to a position's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
    /// Held or deposited tokens.
    Supply,
    /// Claimable rewards.
    Reward,
    /// Debt; valued negatively.
    Borrow,
}

impl LegSide {
    pub fn sign(self) -> Decimal {
        match self {
            Self::Supply | Self::Reward => Decimal::ONE,
            Self::Borrow => Decimal::NEGATIVE_ONE,
        }
    }
}

/// A quantity of one token, optionally carrying the provider's USD price.
///
/// `quantity` is always non-negative; debt is expressed through `side`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLeg {
    /// Provider-assigned id: a contract address, or a native-coin id like `eth`.
    pub token_id: String,
    pub chain_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    /// USD price attached by the balance provider, if it had one.
    pub price: Option<Decimal>,
    pub side: LegSide,
}

/// A complex protocol holding (LP pair, lending market, staking vault, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub protocol_id: String,
    pub protocol_name: String,
    pub chain_id: String,
    /// Pool or market id; distinguishes positions that share token symbols.
    pub pool_id: String,
    /// Provider label such as "Liquidity Pool" or "Lending".
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Net USD value as reported by the provider, kept for audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_usd_value: Option<Decimal>,
    pub legs: Vec<TokenLeg>,
}

impl Position {
    /// Human-readable key in the form `protocol.chain.TOKEN` or
    /// `protocol.chain.TOKEN0-TOKEN1`.
    ///
    /// Keys are not guaranteed unique; two pools of the same pair collide.
    pub fn display_key(&self) -> String {
        let tokens = match self.description.as_deref().filter(|d| !d.is_empty()) {
            Some(description) => description.to_string(),
            None => {
                let symbols: Vec<&str> = self
                    .legs
                    .iter()
                    .filter(|leg| leg.side == LegSide::Supply)
                    .take(2)
                    .map(|leg| leg.symbol.as_str())
                    .collect();
                if symbols.is_empty() {
                    "unknown".to_string()
                } else {
                    symbols.join("-")
                }
            }
        };
        format!("{}.{}.{}", self.protocol_id, self.chain_id, tokens)
    }
}

/// Everything a wallet holds on one chain, as of one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPosition {
    pub chain_id: String,
    pub wallet_address: EvmAddress,
    pub spot_balances: Vec<TokenLeg>,
    pub complex_positions: Vec<Position>,
}

impl WalletPosition {
    pub fn empty(chain_id: impl Into<String>, wallet_address: EvmAddress) -> Self {
        Self {
            chain_id: chain_id.into(),
            wallet_address,
            spot_balances: Vec::new(),
            complex_positions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spot_balances.is_empty() && self.complex_positions.is_empty()
    }

    pub fn leg_count(&self) -> usize {
        self.spot_balances.len()
            + self
                .complex_positions
                .iter()
                .map(|p| p.legs.len())
                .sum::<usize>()
    }
}

/// Output of the fetch stage: one [`WalletPosition`] per scanned chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub wallet_address: EvmAddress,
    pub fetched_at: DateTime<Utc>,
    pub chains: Vec<WalletPosition>,
}

impl PortfolioSnapshot {
    pub fn is_empty(&self) -> bool {
        self.chains.iter().all(WalletPosition::is_empty)
    }
}
