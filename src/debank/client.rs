use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{into_positions, into_spot_leg, RawChain, RawProtocol, RawToken, PROVIDER};
use super::BalanceSource;
use crate::config::DEBANK_API_BASE;
use crate::error::NavError;
use crate::models::{EvmAddress, WalletPosition};
use crate::retry::RetryPolicy;

const USER_AGENT: &str = concat!("vaultnav/", env!("CARGO_PKG_VERSION"));

/// DeBank Pro OpenAPI client.
///
/// Every request carries the `AccessKey` header. Transient failures (429, 5xx,
/// timeouts) are retried under the configured [`RetryPolicy`].
pub struct DebankClient {
    client: reqwest::Client,
    base_url: String,
    access_key: SecretString,
    retry: RetryPolicy,
}

impl DebankClient {
    pub fn new(access_key: SecretString, timeout: Duration) -> Result<Self, NavError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| NavError::config(format!("failed to build DeBank HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEBANK_API_BASE.to_string(),
            access_key,
            retry: RetryPolicy::default(),
        })
    }

    /// Points the client at a different host (staging, or a mock server in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One GET. A literal `null` body is reported as `None`.
    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, NavError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Accept", "application/json")
            .header("AccessKey", self.access_key.expose_secret())
            .send()
            .await
            .map_err(|e| NavError::from_transport(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NavError::from_status(PROVIDER, status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| NavError::from_transport(PROVIDER, e))?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }

        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| NavError::malformed(PROVIDER, format!("{path}: {e}")))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, NavError> {
        self.retry
            .run(path, move || async move { self.get_once(path, query).await })
            .await
    }
}

#[async_trait]
impl BalanceSource for DebankClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn used_chains(&self, wallet: &EvmAddress) -> Result<Vec<String>, NavError> {
        let chains: Option<Vec<RawChain>> = self
            .get("/v1/user/used_chain_list", &[("id", wallet.as_str())])
            .await?;

        Ok(chains
            .unwrap_or_default()
            .into_iter()
            .map(|chain| chain.id.trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn wallet_position(
        &self,
        wallet: &EvmAddress,
        chain_id: &str,
    ) -> Result<WalletPosition, NavError> {
        let tokens: Option<Vec<RawToken>> = self
            .get(
                "/v1/user/token_list",
                &[
                    ("id", wallet.as_str()),
                    ("chain_id", chain_id),
                    ("is_all", "false"),
                ],
            )
            .await?;

        let protocols: Option<Vec<RawProtocol>> = self
            .get(
                "/v1/user/complex_protocol_list",
                &[("id", wallet.as_str()), ("chain_id", chain_id)],
            )
            .await?;

        let mut position = WalletPosition::empty(chain_id, wallet.clone());
        for token in tokens.unwrap_or_default() {
            position.spot_balances.push(into_spot_leg(&token)?);
        }
        for protocol in protocols.unwrap_or_default() {
            position.complex_positions.extend(into_positions(&protocol)?);
        }

        debug!(
            chain = %chain_id,
            spot = position.spot_balances.len(),
            positions = position.complex_positions.len(),
            "fetched wallet position"
        );
        Ok(position)
    }
}
