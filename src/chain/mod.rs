//! On-chain reads of the vault contract.

mod rpc;
mod supply;

pub use rpc::JsonRpcClient;
pub use supply::VaultSupplyReader;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::NavError;
use crate::models::{EvmAddress, VaultShareSupply};

/// A source of vault share supply.
#[async_trait]
pub trait SupplySource: Send + Sync {
    /// Provider chain id the vault lives on.
    fn chain_id(&self) -> &str;

    /// Reads `totalSupply()` and `decimals()` at one block.
    async fn read_supply(
        &self,
        vault: &EvmAddress,
        read_at: DateTime<Utc>,
    ) -> Result<VaultShareSupply, NavError>;
}
