//! Stage orchestration: fetch, supply, compute, publish.
//!
//! Every stage persists its output under the data directory, so any later stage
//! can be rerun on its own from the saved artifacts.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::chain::{SupplySource, VaultSupplyReader};
use crate::clock::Clock;
use crate::config::{Config, Environment, ResolvedConfig};
use crate::debank::{fetch_snapshot, BalanceSource, DebankClient};
use crate::error::NavError;
use crate::models::{NavRecord, PortfolioSnapshot, VaultShareSupply};
use crate::nav::NavCalculator;
use crate::pricing::{CoinGeckoClient, PriceLookup, PriceResolver};
use crate::storage::{ArtifactStore, DocumentSink, MongoDocumentSink, PublishOutcome, RecordPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Fetch,
    Supply,
    Compute,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Fetch => "fetch",
            Stage::Supply => "supply",
            Stage::Compute => "compute",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// A pipeline failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub source: NavError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, NavError> {
    fn at(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

/// The external collaborators one run talks to.
pub struct Clients {
    pub balances: Arc<dyn BalanceSource>,
    pub supply: Arc<dyn SupplySource>,
    pub prices: Arc<dyn PriceLookup>,
    pub sink: Arc<dyn DocumentSink>,
}

impl Clients {
    /// Production clients built from configuration and environment.
    pub fn from_settings(config: &Config, env: &Environment) -> Result<Self, StageError> {
        let timeout = config.http.timeout;
        let retry = config.retry.policy();

        let database = config
            .database_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| NavError::config("database_name is required"))
            .at(Stage::Config)?;

        let balances = DebankClient::new(env.debank_access_key.clone(), timeout)
            .at(Stage::Config)?
            .with_base_url(&config.endpoints.debank)
            .with_retry(retry.clone());
        let supply = VaultSupplyReader::new(&env.rpc_url, &config.chain_id, timeout)
            .at(Stage::Config)?
            .with_retry(retry.clone());
        let prices = CoinGeckoClient::new(timeout)
            .at(Stage::Config)?
            .with_base_url(&config.endpoints.coingecko)
            .with_api_key(env.coingecko_api_key.clone())
            .with_retry(retry);
        let sink = MongoDocumentSink::new(
            env.mongo_uri.clone(),
            database,
            &env.collection_name,
            timeout,
        );

        Ok(Self {
            balances: Arc::new(balances),
            supply: Arc::new(supply),
            prices: Arc::new(prices),
            sink: Arc::new(sink),
        })
    }
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub record: NavRecord,
    pub outcome: PublishOutcome,
}

pub struct Pipeline {
    config: Config,
    artifacts: ArtifactStore,
    clients: Clients,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(config: Config, data_dir: &Path, clients: Clients, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            artifacts: ArtifactStore::new(data_dir),
            clients,
            clock,
        }
    }

    pub fn from_settings(
        resolved: &ResolvedConfig,
        env: &Environment,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StageError> {
        let clients = Clients::from_settings(&resolved.config, env)?;
        Ok(Self::new(
            resolved.config.clone(),
            &resolved.data_dir,
            clients,
            clock,
        ))
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Fetches holdings and saves `portfolio_snapshot.json`.
    pub async fn fetch(&self) -> Result<PortfolioSnapshot, StageError> {
        info!(wallet = %self.config.wallet_address, "fetch stage started");
        let snapshot = fetch_snapshot(
            self.clients.balances.as_ref(),
            &self.config.wallet_address,
            &self.config.scan_chains(),
            self.clock.now(),
        )
        .await
        .at(Stage::Fetch)?;
        self.artifacts
            .save_snapshot(&snapshot)
            .await
            .at(Stage::Fetch)?;
        Ok(snapshot)
    }

    /// Reads the vault supply and saves `vault_supply.json`.
    pub async fn supply(&self) -> Result<VaultShareSupply, StageError> {
        info!(
            vault = %self.config.vault_address,
            chain = self.clients.supply.chain_id(),
            "supply stage started"
        );
        let supply = self
            .clients
            .supply
            .read_supply(&self.config.vault_address, self.clock.now())
            .await
            .at(Stage::Supply)?;
        self.artifacts.save_supply(&supply).await.at(Stage::Supply)?;
        Ok(supply)
    }

    /// Prices every leg and aggregates. Nothing is persisted.
    pub async fn compute(
        &self,
        run_id: &str,
        snapshot: &PortfolioSnapshot,
        supply: &VaultShareSupply,
    ) -> Result<NavRecord, StageError> {
        info!(run_id, "compute stage started");
        let mut resolver = PriceResolver::new(
            self.clients.prices.as_ref(),
            &self.config.asset,
            &self.config.price_ids,
        )
        .await
        .at(Stage::Compute)?;
        let priced = resolver.price_snapshot(snapshot).await;
        info!(
            run_id,
            unresolved = priced.unresolved_count(),
            "legs priced"
        );

        NavCalculator::new(self.config.valuation.unresolved_price, self.clock.as_ref())
            .compute(run_id, &priced, supply)
            .at(Stage::Compute)
    }

    /// Computes from saved artifacts and saves `nav_record.json`, without
    /// touching the document store.
    pub async fn compute_saved(&self, run_id: &str) -> Result<NavRecord, StageError> {
        let snapshot = self.artifacts.load_snapshot().await.at(Stage::Compute)?;
        let supply = self.artifacts.load_supply().await.at(Stage::Compute)?;
        let record = self.compute(run_id, &snapshot, &supply).await?;
        self.artifacts.save_record(&record).await.at(Stage::Compute)?;
        Ok(record)
    }

    pub async fn publish(&self, record: &NavRecord) -> Result<PublishOutcome, StageError> {
        RecordPublisher::new(self.artifacts.clone(), self.clients.sink.clone())
            .with_retry(self.config.retry.policy())
            .publish(record)
            .await
            .at(Stage::Publish)
    }

    /// Publishes the saved `nav_record.json`.
    pub async fn publish_saved(&self) -> Result<(NavRecord, PublishOutcome), StageError> {
        let record = self.artifacts.load_record().await.at(Stage::Publish)?;
        let outcome = self.publish(&record).await?;
        Ok((record, outcome))
    }

    /// Runs every stage in order under a fresh run id.
    pub async fn run(&self) -> Result<RunSummary, StageError> {
        self.run_with_id(&Uuid::new_v4().to_string()).await
    }

    pub async fn run_with_id(&self, run_id: &str) -> Result<RunSummary, StageError> {
        let snapshot = self.fetch().await?;
        let supply = self.supply().await?;
        let record = self.compute(run_id, &snapshot, &supply).await?;
        let outcome = self.publish(&record).await?;
        Ok(RunSummary { record, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_the_stage() {
        let err = StageError {
            stage: Stage::Supply,
            source: NavError::Division("zero supply".into()),
        };
        assert_eq!(
            err.to_string(),
            "supply stage failed: cannot compute NAV per share: zero supply"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
