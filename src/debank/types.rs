//! Wire types for the DeBank Pro OpenAPI and their conversion into typed
//! portfolio entities.
//!
//! Raw structs mirror the JSON loosely (every optional field is `Option`); the
//! `into_*` functions reject anything the aggregator could not value safely.
//! Amounts and prices are read from the JSON number text straight into
//! `Decimal`, never through a float.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::NavError;
use crate::models::{LegSide, Position, TokenLeg};

pub(crate) const PROVIDER: &str = "debank";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawChain {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawToken {
    pub id: String,
    pub chain: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub optimized_symbol: Option<String>,
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    pub price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawProtocol {
    pub id: String,
    pub chain: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub portfolio_item_list: Vec<RawPortfolioItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawPortfolioItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stats: Option<RawStats>,
    #[serde(default)]
    pub pool: Option<RawPool>,
    #[serde(default)]
    pub detail: Option<RawDetail>,
    #[serde(default)]
    pub asset_token_list: Option<Vec<RawToken>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawStats {
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    pub net_usd_value: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawPool {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawDetail {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub supply_token_list: Option<Vec<RawToken>>,
    #[serde(default)]
    pub reward_token_list: Option<Vec<RawToken>>,
    #[serde(default)]
    pub borrow_token_list: Option<Vec<RawToken>>,
}

fn symbol_of(token: &RawToken) -> String {
    token
        .optimized_symbol
        .as_deref()
        .or(token.symbol.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&token.id)
        .to_string()
}

fn inline_price(token: &RawToken) -> Result<Option<Decimal>, NavError> {
    match token.price {
        None => Ok(None),
        Some(price) => {
            if price.is_sign_negative() && !price.is_zero() {
                return Err(NavError::malformed(
                    PROVIDER,
                    format!("negative price {price} for token {}", token.id),
                ));
            }
            // Zero means the provider has no quote, not that the token is worthless.
            Ok(if price.is_zero() { None } else { Some(price.normalize()) })
        }
    }
}

fn leg(token: &RawToken, side: LegSide, quantity: Decimal) -> Result<TokenLeg, NavError> {
    if token.id.trim().is_empty() {
        return Err(NavError::malformed(PROVIDER, "token with empty id"));
    }
    Ok(TokenLeg {
        token_id: token.id.trim().to_lowercase(),
        chain_id: token.chain.trim().to_lowercase(),
        symbol: symbol_of(token),
        quantity: quantity.normalize(),
        price: inline_price(token)?,
        side,
    })
}

/// A wallet token balance. Negative spot amounts cannot be valued and are rejected.
pub(crate) fn into_spot_leg(token: &RawToken) -> Result<TokenLeg, NavError> {
    let quantity = token.amount;
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(NavError::malformed(
            PROVIDER,
            format!("negative spot amount {} for token {}", token.amount, token.id),
        ));
    }
    leg(token, LegSide::Supply, quantity)
}

fn side_legs(tokens: &[RawToken], side: LegSide) -> Result<Vec<TokenLeg>, NavError> {
    tokens
        .iter()
        .map(|token| leg(token, side, token.amount.abs()))
        .collect()
}

fn item_legs(item: &RawPortfolioItem) -> Result<Vec<TokenLeg>, NavError> {
    let detail = item.detail.clone().unwrap_or_default();
    let has_detail = detail.supply_token_list.is_some()
        || detail.reward_token_list.is_some()
        || detail.borrow_token_list.is_some();

    if has_detail {
        let mut legs = Vec::new();
        legs.extend(side_legs(
            detail.supply_token_list.as_deref().unwrap_or_default(),
            LegSide::Supply,
        )?);
        legs.extend(side_legs(
            detail.reward_token_list.as_deref().unwrap_or_default(),
            LegSide::Reward,
        )?);
        legs.extend(side_legs(
            detail.borrow_token_list.as_deref().unwrap_or_default(),
            LegSide::Borrow,
        )?);
        return Ok(legs);
    }

    // Without a detail block the asset list carries signed amounts.
    item.asset_token_list
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|token| {
            let amount = token.amount;
            let side = if amount.is_sign_negative() && !amount.is_zero() {
                LegSide::Borrow
            } else {
                LegSide::Supply
            };
            leg(token, side, amount.abs())
        })
        .collect()
}

/// Flattens one protocol entry into positions, one per portfolio item.
pub(crate) fn into_positions(protocol: &RawProtocol) -> Result<Vec<Position>, NavError> {
    let protocol_id = protocol.id.trim().to_string();
    if protocol_id.is_empty() {
        return Err(NavError::malformed(PROVIDER, "protocol with empty id"));
    }
    let chain_id = protocol.chain.trim().to_lowercase();
    let protocol_name = protocol
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| protocol_id.clone());

    protocol
        .portfolio_item_list
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let pool_id = item
                .pool
                .as_ref()
                .and_then(|pool| pool.id.clone())
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("{protocol_id}:{index}"));
            let reported_usd_value = item
                .stats
                .as_ref()
                .and_then(|stats| stats.net_usd_value)
                .map(|v| v.normalize());
            let description = item
                .detail
                .as_ref()
                .and_then(|detail| detail.description.clone())
                .filter(|d| !d.trim().is_empty());

            Ok(Position {
                protocol_id: protocol_id.clone(),
                protocol_name: protocol_name.clone(),
                chain_id: chain_id.clone(),
                pool_id,
                label: item.name.clone().unwrap_or_default(),
                description,
                reported_usd_value,
                legs: item_legs(item)?,
            })
        })
        .collect()
}
