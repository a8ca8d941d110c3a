use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::error::NavError;
use crate::models::{EvmAddress, UnresolvedPricePolicy};
use crate::retry::RetryPolicy;

pub const DEBANK_API_BASE: &str = "https://pro-openapi.debank.com";
pub const COINGECKO_API_BASE: &str = "https://api.coingecko.com/api/v3";

/// Environment variable that carries a full JSON config payload from the job trigger.
pub const PAYLOAD_ENV: &str = "VAULTNAV_PAYLOAD";

fn default_chain_id() -> String {
    "base".to_string()
}

fn default_ticker() -> String {
    "USDC".to_string()
}

fn default_coingecko_id() -> String {
    "usd-coin".to_string()
}

/// The reference asset every holding is converted into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Display symbol, e.g. "USDC".
    #[serde(default = "default_ticker")]
    pub ticker: String,

    /// CoinGecko id used to price the asset in USD, e.g. "usd-coin".
    #[serde(default = "default_coingecko_id")]
    pub coingecko_id: String,

    /// Contract address of the asset per provider chain id. Legs matching one of
    /// these are valued at exactly 1.
    #[serde(default)]
    pub token_addresses: BTreeMap<String, String>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            ticker: default_ticker(),
            coingecko_id: default_coingecko_id(),
            token_addresses: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    /// `abort` (default) fails the run on any unpriced leg; `omit` leaves it out
    /// of the total and records it in the breakdown.
    pub unresolved_price: UnresolvedPricePolicy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(
        default = "default_initial_backoff",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.initial_backoff)
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout for provider, price and RPC calls.
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_debank_base() -> String {
    DEBANK_API_BASE.to_string()
}

fn default_coingecko_base() -> String {
    COINGECKO_API_BASE.to_string()
}

/// Base URLs of the HTTP providers. Overridable for staging and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    #[serde(default = "default_debank_base")]
    pub debank: String,

    #[serde(default = "default_coingecko_base")]
    pub coingecko: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            debank: default_debank_base(),
            coingecko: default_coingecko_base(),
        }
    }
}

/// Display/output formatting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// If set, reference-asset values printed by the CLI are rounded to this many
    /// decimal places. Stored records are never rounded.
    pub currency_decimals: Option<u32>,
}

/// Pipeline configuration, as read from a file or a trigger payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Wallet whose holdings back the vault.
    pub wallet_address: EvmAddress,

    /// Vault contract whose share supply is read from chain.
    pub vault_address: EvmAddress,

    /// Provider chain id of the vault contract (e.g. "base", "eth").
    #[serde(default = "default_chain_id")]
    pub chain_id: String,

    /// Provider chains to scan. Empty means "every chain the wallet has used".
    #[serde(default)]
    pub chains: Vec<String>,

    #[serde(default)]
    pub asset: AssetConfig,

    /// MongoDB database receiving NAV records.
    #[serde(default)]
    pub database_name: Option<String>,

    /// Directory for stage artifacts. If relative, resolved from the config
    /// file's directory (or the working directory for payloads).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Provider token id to CoinGecko id overrides for fallback price lookups.
    #[serde(default)]
    pub price_ids: BTreeMap<String, String>,

    #[serde(default)]
    pub valuation: ValuationConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

impl Config {
    /// Load config from a file. `.json` files are parsed as JSON, anything else
    /// as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON payload delivered by the job trigger.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(payload).context("Failed to parse config payload")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset.ticker.trim().is_empty() {
            anyhow::bail!("asset.ticker must not be empty");
        }
        if self.asset.coingecko_id.trim().is_empty() {
            anyhow::bail!("asset.coingecko_id must not be empty");
        }
        if self.chain_id.trim().is_empty() {
            anyhow::bail!("chain_id must not be empty");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        for (chain, address) in &self.asset.token_addresses {
            EvmAddress::parse(address)
                .with_context(|| format!("Invalid asset.token_addresses.{chain}"))?;
        }
        Ok(())
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `base_dir`.
    /// If `data_dir` is not set, returns `base_dir/data`.
    pub fn resolve_data_dir(&self, base_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => base_dir.join(data_dir),
            None => base_dir.join("data"),
        }
    }

    /// Chains to scan, normalized to lowercase and de-duplicated in order.
    pub fn scan_chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = Vec::new();
        for chain in &self.chains {
            let chain = chain.trim().to_lowercase();
            if !chain.is_empty() && !chains.contains(&chain) {
                chains.push(chain);
            }
        }
        chains
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,

    /// The resolved data directory path.
    pub data_dir: PathBuf,

    /// Where the configuration came from, for display.
    pub source: String,
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    ///
    /// The data directory is resolved relative to the config file's parent directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        let data_dir = config.resolve_data_dir(config_dir);

        Ok(Self {
            config,
            data_dir,
            source: config_path.display().to_string(),
        })
    }

    /// Resolve a trigger payload. Relative data directories are resolved from
    /// the current working directory.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let config = Config::from_payload(payload)?;
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let data_dir = config.resolve_data_dir(&cwd);

        Ok(Self {
            config,
            data_dir,
            source: "payload".to_string(),
        })
    }

    /// A payload, when present, wins over the config file.
    pub fn load_with_payload(config_path: &Path, payload: Option<&str>) -> Result<Self> {
        match payload.map(str::trim).filter(|p| !p.is_empty()) {
            Some(payload) => Self::from_payload(payload),
            None => Self::load(config_path),
        }
    }
}

/// Secrets and endpoints supplied through the process environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub debank_access_key: SecretString,
    pub mongo_uri: SecretString,
    pub collection_name: String,
    pub rpc_url: String,
    pub coingecko_api_key: Option<SecretString>,
}

impl Environment {
    pub const DEBANK_ACCESS_KEY: &'static str = "DEBANK_ACCESS_KEY";
    pub const MONGO_URI: &'static str = "MONGO_URI";
    pub const COLLECTION_NAME: &'static str = "COLLECTION_NAME";
    pub const RPC_URL: &'static str = "RPC_URL";
    pub const COINGECKO_API_KEY: &'static str = "COINGECKO_API_KEY";

    pub fn from_env() -> Result<Self, NavError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup. Every missing required variable is
    /// reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NavError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let required = [
            Self::DEBANK_ACCESS_KEY,
            Self::MONGO_URI,
            Self::COLLECTION_NAME,
            Self::RPC_URL,
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(NavError::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let value = |key: &str| get(key).unwrap_or_default();
        Ok(Self {
            debank_access_key: SecretString::from(value(Self::DEBANK_ACCESS_KEY)),
            mongo_uri: SecretString::from(value(Self::MONGO_URI)),
            collection_name: value(Self::COLLECTION_NAME),
            rpc_url: value(Self::RPC_URL),
            coingecko_api_key: get(Self::COINGECKO_API_KEY).map(SecretString::from),
        })
    }
}
