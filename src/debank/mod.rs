//! Balance fetching from the portfolio provider.

mod client;
mod types;

pub use client::DebankClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::NavError;
use crate::models::{EvmAddress, PortfolioSnapshot, WalletPosition};

/// A source of wallet holdings.
///
/// "No holdings" is an `Ok` with empty lists; only a failed fetch is an error.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Chains the wallet has ever transacted on.
    async fn used_chains(&self, wallet: &EvmAddress) -> Result<Vec<String>, NavError>;

    /// Spot balances and protocol positions of `wallet` on one chain.
    async fn wallet_position(
        &self,
        wallet: &EvmAddress,
        chain_id: &str,
    ) -> Result<WalletPosition, NavError>;
}

/// Fetches every requested chain, one after another.
///
/// With an empty `chains` list the source is asked which chains the wallet uses.
pub async fn fetch_snapshot(
    source: &dyn BalanceSource,
    wallet: &EvmAddress,
    chains: &[String],
    fetched_at: DateTime<Utc>,
) -> Result<PortfolioSnapshot, NavError> {
    let chains = if chains.is_empty() {
        let discovered = source.used_chains(wallet).await?;
        info!(
            source = source.name(),
            wallet = %wallet,
            chains = ?discovered,
            "discovered active chains"
        );
        discovered
    } else {
        chains.to_vec()
    };

    let mut unique: Vec<String> = Vec::with_capacity(chains.len());
    for chain in chains {
        if !unique.contains(&chain) {
            unique.push(chain);
        }
    }

    let mut positions = Vec::with_capacity(unique.len());
    for chain in &unique {
        let position = source.wallet_position(wallet, chain).await?;
        if position.is_empty() {
            warn!(chain = %chain, wallet = %wallet, "no holdings on chain");
        }
        positions.push(position);
    }

    let snapshot = PortfolioSnapshot {
        wallet_address: wallet.clone(),
        fetched_at,
        chains: positions,
    };
    info!(
        source = source.name(),
        chains = snapshot.chains.len(),
        legs = snapshot.chains.iter().map(WalletPosition::leg_count).sum::<usize>(),
        "portfolio snapshot fetched"
    );
    Ok(snapshot)
}
