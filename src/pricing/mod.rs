//! Price resolution in reference-asset units.

pub mod coingecko;
mod resolver;

pub use coingecko::CoinGeckoClient;
pub use resolver::PriceResolver;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::NavError;
use crate::models::{EvmAddress, Position, PriceOrigin, ReferenceAsset, TokenLeg};

/// An external USD price service.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    fn name(&self) -> &str;

    /// USD price of a coin identified by its canonical price-service id.
    async fn usd_price(&self, coin_id: &str) -> Result<Option<Decimal>, NavError>;

    /// USD price of a token contract on a provider chain.
    async fn token_usd_price(
        &self,
        chain_id: &str,
        contract: &str,
    ) -> Result<Option<Decimal>, NavError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LegPrice {
    Resolved { price: Decimal, origin: PriceOrigin },
    Unresolved { reason: String },
}

/// A token leg with its price in reference-asset units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLeg {
    pub leg: TokenLeg,
    pub price: LegPrice,
}

impl PricedLeg {
    pub fn is_resolved(&self) -> bool {
        matches!(self.price, LegPrice::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedPosition {
    pub position: Position,
    /// Same order as `position.legs`.
    pub legs: Vec<PricedLeg>,
}

/// A portfolio snapshot with every leg priced (or marked unresolved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedPortfolio {
    pub wallet_address: EvmAddress,
    pub fetched_at: DateTime<Utc>,
    pub reference: ReferenceAsset,
    pub spot: Vec<PricedLeg>,
    pub positions: Vec<PricedPosition>,
}

impl PricedPortfolio {
    pub fn unresolved_count(&self) -> usize {
        self.spot
            .iter()
            .chain(self.positions.iter().flat_map(|p| p.legs.iter()))
            .filter(|leg| !leg.is_resolved())
            .count()
    }
}
