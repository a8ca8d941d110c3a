use std::collections::{BTreeMap, HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{LegPrice, PriceLookup, PricedLeg, PricedPortfolio, PricedPosition};
use crate::config::AssetConfig;
use crate::error::NavError;
use crate::models::{EvmAddress, PortfolioSnapshot, PriceOrigin, ReferenceAsset, TokenLeg};

/// Prices token legs in reference-asset units for a single run.
///
/// Order of preference per leg: the reference asset itself (price 1), the
/// provider's inline USD price, then a price-service lookup. Lookup results,
/// including failures, are memoized for the life of the resolver.
pub struct PriceResolver<'a> {
    lookup: &'a dyn PriceLookup,
    reference: ReferenceAsset,
    reference_tokens: HashSet<(String, String)>,
    /// Keyed by lowercase token id, matching how legs are stored.
    price_ids: HashMap<String, String>,
    cache: HashMap<String, Result<Option<Decimal>, String>>,
}

impl<'a> PriceResolver<'a> {
    /// Fetches the reference asset's USD price. Without it no leg can be
    /// converted, so a failure here is returned rather than deferred.
    pub async fn new(
        lookup: &'a dyn PriceLookup,
        asset: &AssetConfig,
        price_ids: &BTreeMap<String, String>,
    ) -> Result<Self, NavError> {
        let price_usd = lookup
            .usd_price(&asset.coingecko_id)
            .await?
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| {
                NavError::malformed(
                    lookup.name(),
                    format!("no USD price for reference asset {}", asset.coingecko_id),
                )
            })?;

        let reference_tokens = asset
            .token_addresses
            .iter()
            .filter_map(|(chain, address)| match EvmAddress::parse(address) {
                Ok(parsed) => Some((chain.trim().to_lowercase(), parsed.as_str().to_string())),
                Err(e) => {
                    warn!(chain = %chain, error = %e, "ignoring invalid reference token address");
                    None
                }
            })
            .collect();
        let price_ids = price_ids
            .iter()
            .map(|(token, id)| (token.trim().to_lowercase(), id.trim().to_string()))
            .collect();

        debug!(
            ticker = %asset.ticker,
            price_usd = %price_usd,
            "reference asset priced"
        );

        Ok(Self {
            lookup,
            reference: ReferenceAsset {
                ticker: asset.ticker.clone(),
                coingecko_id: asset.coingecko_id.clone(),
                price_usd,
            },
            reference_tokens,
            price_ids,
            cache: HashMap::new(),
        })
    }

    pub fn reference(&self) -> &ReferenceAsset {
        &self.reference
    }

    fn is_reference(&self, leg: &TokenLeg) -> bool {
        self.reference_tokens
            .contains(&(leg.chain_id.clone(), leg.token_id.clone()))
            || self
                .price_ids
                .get(&leg.token_id)
                .is_some_and(|id| *id == self.reference.coingecko_id)
    }

    fn usd_to_reference(&self, usd: Decimal) -> Option<Decimal> {
        usd.checked_div(self.reference.price_usd).map(|p| p.normalize())
    }

    async fn lookup_usd(&mut self, leg: &TokenLeg) -> Result<Option<Decimal>, String> {
        let (key, coin_id) = match self.price_ids.get(&leg.token_id) {
            Some(id) => (format!("id:{id}"), Some(id.clone())),
            None if is_contract(&leg.token_id) => {
                (format!("token:{}:{}", leg.chain_id, leg.token_id), None)
            }
            None => {
                return Err(format!(
                    "no price id for {} on {}; map it under price_ids",
                    leg.token_id, leg.chain_id
                ))
            }
        };

        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let result = match coin_id {
            Some(id) => self.lookup.usd_price(&id).await,
            None => self.lookup.token_usd_price(&leg.chain_id, &leg.token_id).await,
        }
        .map_err(|e| e.to_string());

        self.cache.insert(key, result.clone());
        result
    }

    pub async fn resolve_leg(&mut self, leg: &TokenLeg) -> LegPrice {
        if self.is_reference(leg) {
            return LegPrice::Resolved {
                price: Decimal::ONE,
                origin: PriceOrigin::Reference,
            };
        }

        let (usd, origin) = match leg.price {
            Some(usd) => (usd, PriceOrigin::Inline),
            None => match self.lookup_usd(leg).await {
                Ok(Some(usd)) => (usd, PriceOrigin::Lookup),
                Ok(None) => {
                    return unresolved(leg, format!("{} has no quote", self.lookup.name()))
                }
                Err(reason) => return unresolved(leg, reason),
            },
        };

        match self.usd_to_reference(usd) {
            Some(price) => LegPrice::Resolved { price, origin },
            None => unresolved(leg, format!("USD price {usd} out of range")),
        }
    }

    async fn price_legs(&mut self, legs: &[TokenLeg]) -> Vec<PricedLeg> {
        let mut priced = Vec::with_capacity(legs.len());
        for leg in legs {
            let price = self.resolve_leg(leg).await;
            priced.push(PricedLeg {
                leg: leg.clone(),
                price,
            });
        }
        priced
    }

    pub async fn price_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> PricedPortfolio {
        let mut spot = Vec::new();
        let mut positions = Vec::new();

        for chain in &snapshot.chains {
            spot.extend(self.price_legs(&chain.spot_balances).await);
            for position in &chain.complex_positions {
                let legs = self.price_legs(&position.legs).await;
                positions.push(PricedPosition {
                    position: position.clone(),
                    legs,
                });
            }
        }

        PricedPortfolio {
            wallet_address: snapshot.wallet_address.clone(),
            fetched_at: snapshot.fetched_at,
            reference: self.reference.clone(),
            spot,
            positions,
        }
    }
}

fn is_contract(token_id: &str) -> bool {
    token_id.len() == 42
        && token_id.starts_with("0x")
        && token_id[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn unresolved(leg: &TokenLeg, reason: String) -> LegPrice {
    warn!(
        token = %leg.token_id,
        chain = %leg.chain_id,
        symbol = %leg.symbol,
        reason = %reason,
        "price unresolved"
    );
    LegPrice::Unresolved { reason }
}
