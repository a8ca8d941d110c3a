//! CoinGecko USD price lookups.
//!
//! Two endpoints are used: `/simple/price` for coins known by CoinGecko id, and
//! `/simple/token_price/{platform}` for ERC-20 contracts on a supported chain.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::PriceLookup;
use crate::config::COINGECKO_API_BASE;
use crate::error::NavError;
use crate::retry::RetryPolicy;

const PROVIDER: &str = "coingecko";
const USER_AGENT: &str = concat!("vaultnav/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    usd: Option<Decimal>,
}

/// `{ "<id or contract>": { "usd": 1.0 } }`
type SimplePriceResponse = HashMap<String, Quote>;

/// Maps a portfolio-provider chain id to CoinGecko's asset platform id.
pub fn platform_for_chain(chain_id: &str) -> Option<&'static str> {
    let platform = match chain_id.to_lowercase().as_str() {
        "eth" => "ethereum",
        "base" => "base",
        "arb" => "arbitrum-one",
        "op" => "optimistic-ethereum",
        "matic" => "polygon-pos",
        "bsc" => "binance-smart-chain",
        "avax" => "avalanche",
        "xdai" => "xdai",
        "ftm" => "fantom",
        "linea" => "linea",
        "scrl" => "scroll",
        "era" => "zksync",
        "mnt" => "mantle",
        "blast" => "blast",
        _ => return None,
    };
    Some(platform)
}

pub struct CoinGeckoClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    retry: RetryPolicy,
}

impl CoinGeckoClient {
    pub fn new(timeout: Duration) -> Result<Self, NavError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| NavError::config(format!("failed to build CoinGecko HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: COINGECKO_API_BASE.to_string(),
            api_key: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sends the key as `x-cg-pro-api-key`.
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<SimplePriceResponse, NavError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .query(query)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NavError::from_transport(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NavError::from_status(PROVIDER, status, body));
        }

        response
            .json()
            .await
            .map_err(|e| NavError::malformed(PROVIDER, format!("{path}: {e}")))
    }

    async fn fetch(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<SimplePriceResponse, NavError> {
        self.retry
            .run(path, move || async move { self.fetch_once(path, query).await })
            .await
    }

    fn usd_of(data: &SimplePriceResponse, key: &str) -> Option<Decimal> {
        data.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, quote)| quote.usd)
            .filter(|p| *p > Decimal::ZERO)
            .map(|p| p.normalize())
    }
}

#[async_trait]
impl PriceLookup for CoinGeckoClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn usd_price(&self, coin_id: &str) -> Result<Option<Decimal>, NavError> {
        let data = self
            .fetch(
                "/simple/price",
                &[("ids", coin_id), ("vs_currencies", "usd")],
            )
            .await?;
        Ok(Self::usd_of(&data, coin_id))
    }

    async fn token_usd_price(
        &self,
        chain_id: &str,
        contract: &str,
    ) -> Result<Option<Decimal>, NavError> {
        let Some(platform) = platform_for_chain(chain_id) else {
            return Ok(None);
        };
        let path = format!("/simple/token_price/{platform}");
        let data = self
            .fetch(
                &path,
                &[("contract_addresses", contract), ("vs_currencies", "usd")],
            )
            .await?;
        Ok(Self::usd_of(&data, contract))
    }
}
