use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::rpc::{decode_uint_word, JsonRpcClient};
use super::SupplySource;
use crate::error::{NavError, RpcErrorKind};
use crate::models::{EvmAddress, VaultShareSupply};
use crate::retry::RetryPolicy;

/// `totalSupply()`
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";
/// `decimals()`
const DECIMALS_SELECTOR: &str = "0x313ce567";

/// Largest scale a `Decimal` can carry.
const MAX_DECIMALS: u128 = 28;

/// Reads an ERC-20 style vault's share supply over JSON-RPC.
pub struct VaultSupplyReader {
    rpc: JsonRpcClient,
    chain_id: String,
    retry: RetryPolicy,
}

impl VaultSupplyReader {
    pub fn new(
        rpc_url: impl Into<String>,
        chain_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NavError> {
        Ok(Self {
            rpc: JsonRpcClient::new(rpc_url, timeout)?,
            chain_id: chain_id.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn read_word(
        &self,
        vault: &EvmAddress,
        selector: &str,
        accessor: &'static str,
        block: u64,
    ) -> Result<u128, NavError> {
        let rpc = &self.rpc;
        let data = self
            .retry
            .run(accessor, move || async move {
                rpc.eth_call(vault, selector, block).await
            })
            .await?;
        decode_uint_word(&data)?.ok_or(NavError::Rpc(RpcErrorKind::MissingAccessor(accessor)))
    }
}

#[async_trait]
impl SupplySource for VaultSupplyReader {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn read_supply(
        &self,
        vault: &EvmAddress,
        read_at: DateTime<Utc>,
    ) -> Result<VaultShareSupply, NavError> {
        let rpc = &self.rpc;
        let block = self
            .retry
            .run("eth_blockNumber", move || async move { rpc.block_number().await })
            .await?;

        let total_supply = self
            .read_word(vault, TOTAL_SUPPLY_SELECTOR, "totalSupply", block)
            .await?;
        let decimals = self
            .read_word(vault, DECIMALS_SELECTOR, "decimals", block)
            .await?;
        if decimals > MAX_DECIMALS {
            return Err(NavError::Rpc(RpcErrorKind::Malformed(format!(
                "decimals() returned {decimals}, above the supported maximum of {MAX_DECIMALS}"
            ))));
        }

        let supply = VaultShareSupply {
            vault_address: vault.clone(),
            chain_id: self.chain_id.clone(),
            total_supply,
            // Bounded by MAX_DECIMALS above.
            decimals: decimals as u8,
            block_number: block,
            read_at,
        };
        supply.shares().map_err(|e| {
            NavError::Rpc(RpcErrorKind::Malformed(format!(
                "totalSupply() returned {total_supply}: {e}"
            )))
        })?;
        info!(
            vault = %vault,
            chain = %self.chain_id,
            block,
            total_supply = %supply.total_supply,
            decimals = supply.decimals,
            "vault share supply read"
        );
        Ok(supply)
    }
}
