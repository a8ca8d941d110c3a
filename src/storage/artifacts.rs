use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::NavError;
use crate::models::{NavRecord, PortfolioSnapshot, VaultShareSupply};

pub const SNAPSHOT_FILE: &str = "portfolio_snapshot.json";
pub const SUPPLY_FILE: &str = "vault_supply.json";
pub const RECORD_FILE: &str = "nav_record.json";
pub const RECORDS_DIR: &str = "records";

/// Stage artifacts on local disk.
///
/// Directory structure:
/// ```text
/// data/
///   portfolio_snapshot.json
///   vault_supply.json
///   nav_record.json
///   records/
///     {run_id}.json
/// ```
///
/// The top-level files hold the latest run's output and are overwritten; the
/// `records/` copies are never rewritten.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_path: PathBuf,
}

fn artifact_error(path: &Path, message: impl std::fmt::Display) -> NavError {
    NavError::Artifact {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

impl ArtifactStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.base_path.join(SNAPSHOT_FILE)
    }

    pub fn supply_file(&self) -> PathBuf {
        self.base_path.join(SUPPLY_FILE)
    }

    pub fn record_file(&self) -> PathBuf {
        self.base_path.join(RECORD_FILE)
    }

    pub fn history_file(&self, run_id: &str) -> PathBuf {
        self.base_path.join(RECORDS_DIR).join(format!("{run_id}.json"))
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), NavError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| artifact_error(parent, format!("failed to create directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, NavError> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| artifact_error(path, format!("failed to parse JSON: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(artifact_error(path, format!("failed to read file: {e}"))),
        }
    }

    /// Writes through a temp file and rename so readers never see half a file.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), NavError> {
        self.ensure_parent(path).await?;
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| artifact_error(path, format!("failed to serialize JSON: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| artifact_error(&tmp, format!("failed to write file: {e}")))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| artifact_error(path, format!("failed to replace file: {e}")))?;
        Ok(())
    }

    async fn require<T: DeserializeOwned>(&self, path: PathBuf, hint: &str) -> Result<T, NavError> {
        self.read_json(&path)
            .await?
            .ok_or_else(|| artifact_error(&path, format!("not found; run `{hint}` first")))
    }

    pub async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<PathBuf, NavError> {
        let path = self.snapshot_file();
        self.write_json(&path, snapshot).await?;
        Ok(path)
    }

    pub async fn load_snapshot(&self) -> Result<PortfolioSnapshot, NavError> {
        self.require(self.snapshot_file(), "vaultnav fetch").await
    }

    pub async fn save_supply(&self, supply: &VaultShareSupply) -> Result<PathBuf, NavError> {
        let path = self.supply_file();
        self.write_json(&path, supply).await?;
        Ok(path)
    }

    pub async fn load_supply(&self) -> Result<VaultShareSupply, NavError> {
        self.require(self.supply_file(), "vaultnav supply").await
    }

    /// Writes `nav_record.json` and the per-run history copy.
    pub async fn save_record(&self, record: &NavRecord) -> Result<PathBuf, NavError> {
        self.write_json(&self.history_file(&record.run_id), record)
            .await?;
        let path = self.record_file();
        self.write_json(&path, record).await?;
        Ok(path)
    }

    pub async fn load_record(&self) -> Result<NavRecord, NavError> {
        self.require(self.record_file(), "vaultnav compute").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvmAddress;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn supply() -> VaultShareSupply {
        VaultShareSupply {
            vault_address: EvmAddress::parse("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359")
                .unwrap(),
            chain_id: "base".to_string(),
            total_supply: 2_000_000_000,
            decimals: 6,
            block_number: 42,
            read_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn supply_round_trips_and_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested/data"));

        let path = store.save_supply(&supply()).await.unwrap();
        assert!(path.ends_with(SUPPLY_FILE));
        assert_eq!(store.load_supply().await.unwrap(), supply());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_artifact_names_the_stage() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());

        match store.load_snapshot().await {
            Err(NavError::Artifact { path, message }) => {
                assert!(path.ends_with(SNAPSHOT_FILE));
                assert!(message.contains("vaultnav fetch"));
            }
            other => panic!("expected artifact error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        std::fs::write(store.supply_file(), "{not json").unwrap();

        assert!(matches!(
            store.load_supply().await,
            Err(NavError::Artifact { .. })
        ));
    }
}
