use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::NavError;
use crate::models::{
    Breakdown, LineItem, NavRecord, Omission, PositionTotal, PositionValuation,
    UnresolvedPricePolicy, VaultShareSupply,
};
use crate::pricing::{LegPrice, PricedLeg, PricedPortfolio};

/// Turns a priced portfolio and a share supply into a [`NavRecord`].
///
/// Pure apart from the injected clock: identical inputs, clock and run id
/// produce an identical record.
pub struct NavCalculator<'a> {
    policy: UnresolvedPricePolicy,
    clock: &'a dyn Clock,
}

/// Running sums for one valuation pass.
#[derive(Default)]
struct Totals {
    total: Decimal,
    by_network: BTreeMap<String, Decimal>,
    by_key: BTreeMap<String, Decimal>,
    omissions: Vec<Omission>,
}

impl Totals {
    fn add(&mut self, chain_id: &str, key: &str, value: Decimal) -> Result<(), NavError> {
        self.total = checked_add(self.total, value)?;
        let network = self.by_network.entry(chain_id.to_string()).or_default();
        *network = checked_add(*network, value)?;
        let position = self.by_key.entry(key.to_string()).or_default();
        *position = checked_add(*position, value)?;
        Ok(())
    }

    /// Values one leg, or records it as omitted. Returns the line for resolved legs.
    fn value_leg(&mut self, location: &str, priced: &PricedLeg) -> Result<Option<LineItem>, NavError> {
        let leg = &priced.leg;
        match &priced.price {
            LegPrice::Resolved { price, origin } => {
                let value = leg
                    .quantity
                    .checked_mul(*price)
                    .and_then(|v| v.checked_mul(leg.side.sign()))
                    .ok_or_else(|| {
                        NavError::Overflow(format!(
                            "{} {} x {price} at {location}",
                            leg.quantity, leg.symbol
                        ))
                    })?
                    .normalize();
                Ok(Some(LineItem {
                    token_id: leg.token_id.clone(),
                    chain_id: leg.chain_id.clone(),
                    symbol: leg.symbol.clone(),
                    side: leg.side,
                    quantity: leg.quantity,
                    price: *price,
                    price_origin: *origin,
                    value,
                }))
            }
            LegPrice::Unresolved { reason } => {
                self.omissions.push(Omission {
                    location: location.to_string(),
                    token_id: leg.token_id.clone(),
                    chain_id: leg.chain_id.clone(),
                    symbol: leg.symbol.clone(),
                    quantity: leg.quantity,
                    reason: reason.clone(),
                });
                Ok(None)
            }
        }
    }
}

/// `base`, else `base@pool`, else `base@pool#2`, `base@pool#3`, ...
///
/// Pools of the same pair, and several positions inside one pool, stay apart.
fn unique_key(used: &mut HashSet<String>, base: String, pool_id: &str) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let pooled = format!("{base}@{pool_id}");
    let mut candidate = pooled.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{pooled}#{n}");
        n += 1;
    }
    candidate
}

fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, NavError> {
    a.checked_add(b)
        .ok_or_else(|| NavError::Overflow(format!("{a} + {b}")))
}

impl<'a> NavCalculator<'a> {
    pub fn new(policy: UnresolvedPricePolicy, clock: &'a dyn Clock) -> Self {
        Self { policy, clock }
    }

    pub fn compute(
        &self,
        run_id: &str,
        priced: &PricedPortfolio,
        supply: &VaultShareSupply,
    ) -> Result<NavRecord, NavError> {
        let mut totals = Totals::default();

        let mut spot = Vec::with_capacity(priced.spot.len());
        for leg in &priced.spot {
            let location = format!("spot.{}", leg.leg.chain_id);
            if let Some(line) = totals.value_leg(&location, leg)? {
                totals.add(&line.chain_id, &location, line.value)?;
                spot.push(line);
            }
        }

        let mut used_keys = HashSet::new();
        let mut protocols = Vec::with_capacity(priced.positions.len());
        for entry in &priced.positions {
            let position = &entry.position;
            let key = unique_key(&mut used_keys, position.display_key(), &position.pool_id);

            let mut value = Decimal::ZERO;
            let mut legs = Vec::with_capacity(entry.legs.len());
            for leg in &entry.legs {
                if let Some(line) = totals.value_leg(&key, leg)? {
                    value = checked_add(value, line.value)?;
                    legs.push(line);
                }
            }
            totals.add(&position.chain_id, &key, value)?;

            protocols.push(PositionValuation {
                key,
                protocol_id: position.protocol_id.clone(),
                protocol_name: position.protocol_name.clone(),
                chain_id: position.chain_id.clone(),
                pool_id: position.pool_id.clone(),
                label: position.label.clone(),
                value: value.normalize(),
                reported_usd_value: position.reported_usd_value,
                legs,
            });
        }

        if !totals.omissions.is_empty() {
            match self.policy {
                UnresolvedPricePolicy::Abort => {
                    return Err(NavError::IncompleteValuation {
                        legs: totals
                            .omissions
                            .iter()
                            .map(|o| format!("{}.{}", o.location, o.symbol))
                            .collect(),
                    });
                }
                UnresolvedPricePolicy::Omit => {
                    for omission in &totals.omissions {
                        warn!(
                            location = %omission.location,
                            token = %omission.token_id,
                            symbol = %omission.symbol,
                            quantity = %omission.quantity,
                            reason = %omission.reason,
                            "leg omitted from NAV"
                        );
                    }
                }
            }
        }

        let shares = supply.shares()?;
        if shares.is_zero() {
            return Err(NavError::Division(format!(
                "vault {} has zero share supply at block {}",
                supply.vault_address, supply.block_number
            )));
        }

        let total = totals.total;
        let nav_per_share = total
            .checked_div(shares)
            .ok_or_else(|| NavError::Overflow(format!("{total} / {shares}")))?;
        let reference_usd = priced.reference.price_usd;
        let total_value_usd = total
            .checked_mul(reference_usd)
            .ok_or_else(|| NavError::Overflow(format!("{total} x {reference_usd}")))?;
        let share_price_usd = nav_per_share
            .checked_mul(reference_usd)
            .ok_or_else(|| NavError::Overflow(format!("{nav_per_share} x {reference_usd}")))?;

        let mut positions: Vec<PositionTotal> = totals
            .by_key
            .into_iter()
            .filter(|(_, value)| !value.is_zero())
            .map(|(key, value)| PositionTotal {
                key,
                value: value.normalize(),
            })
            .collect();
        positions.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.key.cmp(&b.key)));

        let record = NavRecord {
            run_id: run_id.to_string(),
            timestamp: self.clock.now(),
            wallet_address: priced.wallet_address.clone(),
            vault_address: supply.vault_address.clone(),
            chain_id: supply.chain_id.clone(),
            reference_asset_ticker: priced.reference.ticker.clone(),
            reference_asset: priced.reference.clone(),
            total_value_reference_asset: total.normalize(),
            total_value_usd: total_value_usd.normalize(),
            nav_per_share: nav_per_share.normalize(),
            share_price_usd: share_price_usd.normalize(),
            total_supply: supply.total_supply.to_string(),
            share_decimals: supply.decimals,
            supply_block: supply.block_number,
            valuation_policy: self.policy,
            raw_breakdown: Breakdown {
                spot,
                protocols,
                positions,
                network_totals: totals
                    .by_network
                    .into_iter()
                    .map(|(chain, value)| (chain, value.normalize()))
                    .collect(),
                omissions: totals.omissions,
            },
        };

        info!(
            run_id = %record.run_id,
            total = %record.total_value_reference_asset,
            nav_per_share = %record.nav_per_share,
            ticker = %record.reference_asset_ticker,
            omissions = record.raw_breakdown.omissions.len(),
            "NAV computed"
        );
        Ok(record)
    }
}
