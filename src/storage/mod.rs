mod artifacts;
mod memory;
mod mongo;

pub use artifacts::{ArtifactStore, RECORDS_DIR, RECORD_FILE, SNAPSHOT_FILE, SUPPLY_FILE};
pub use memory::{FailingDocumentSink, MemoryDocumentSink};
pub use mongo::{record_to_document, MongoDocumentSink};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::NavError;
use crate::models::NavRecord;
use crate::retry::RetryPolicy;

/// Append-only destination for NAV records.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    fn name(&self) -> &str;

    /// Inserts a new document and returns its id. Never updates an existing one.
    async fn insert(&self, record: &NavRecord) -> Result<String, NavError>;
}

/// What happened to each copy of a published record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub local_path: Option<PathBuf>,
    pub document_id: Option<String>,
    pub local_error: Option<String>,
    pub remote_error: Option<String>,
}

impl PublishOutcome {
    pub fn is_complete(&self) -> bool {
        self.local_path.is_some() && self.document_id.is_some()
    }
}

/// Writes a record to local artifacts first, then to the document store.
///
/// Either copy succeeding is enough; the run fails only when both fail.
pub struct RecordPublisher {
    artifacts: ArtifactStore,
    sink: Arc<dyn DocumentSink>,
    retry: RetryPolicy,
}

impl RecordPublisher {
    pub fn new(artifacts: ArtifactStore, sink: Arc<dyn DocumentSink>) -> Self {
        Self {
            artifacts,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn publish(&self, record: &NavRecord) -> Result<PublishOutcome, NavError> {
        let mut outcome = PublishOutcome::default();

        match self.artifacts.save_record(record).await {
            Ok(path) => outcome.local_path = Some(path),
            Err(e) => {
                warn!(run_id = %record.run_id, error = %e, "failed to write local record");
                outcome.local_error = Some(e.to_string());
            }
        }

        let sink = self.sink.as_ref();
        let inserted = self
            .retry
            .run("document insert", move || async move { sink.insert(record).await })
            .await;
        match inserted {
            Ok(id) => outcome.document_id = Some(id),
            Err(e) => {
                warn!(
                    run_id = %record.run_id,
                    sink = sink.name(),
                    error = %e,
                    "failed to insert record"
                );
                outcome.remote_error = Some(e.to_string());
            }
        }

        if let (Some(local), Some(remote)) = (&outcome.local_error, &outcome.remote_error) {
            return Err(NavError::Persistence {
                local: local.clone(),
                remote: remote.clone(),
            });
        }

        info!(
            run_id = %record.run_id,
            local = ?outcome.local_path,
            document_id = ?outcome.document_id,
            "record published"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Breakdown, EvmAddress, ReferenceAsset, UnresolvedPricePolicy};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn record(run_id: &str) -> NavRecord {
        NavRecord {
            run_id: run_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            wallet_address: EvmAddress::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
                .unwrap(),
            vault_address: EvmAddress::parse("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359")
                .unwrap(),
            chain_id: "base".to_string(),
            reference_asset_ticker: "USDC".to_string(),
            reference_asset: ReferenceAsset {
                ticker: "USDC".to_string(),
                coingecko_id: "usd-coin".to_string(),
                price_usd: Decimal::ONE,
            },
            total_value_reference_asset: Decimal::new(2000, 0),
            total_value_usd: Decimal::new(2000, 0),
            nav_per_share: Decimal::ONE,
            share_price_usd: Decimal::ONE,
            total_supply: "2000000000".to_string(),
            share_decimals: 6,
            supply_block: 1,
            valuation_policy: UnresolvedPricePolicy::Abort,
            raw_breakdown: Breakdown::default(),
        }
    }

    #[tokio::test]
    async fn publishes_to_both_destinations() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemoryDocumentSink::new());
        let publisher = RecordPublisher::new(ArtifactStore::new(dir.path()), sink.clone());

        let outcome = publisher.publish(&record("run-a")).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.document_id.as_deref(), Some("memory-1"));
        assert!(dir.path().join(RECORD_FILE).exists());
        assert!(dir.path().join(RECORDS_DIR).join("run-a.json").exists());
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn each_publish_appends() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemoryDocumentSink::new());
        let publisher = RecordPublisher::new(ArtifactStore::new(dir.path()), sink.clone());

        publisher.publish(&record("run-a")).await.unwrap();
        publisher.publish(&record("run-b")).await.unwrap();
        let ids: Vec<String> = sink.records().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["run-a", "run-b"]);
        assert!(dir.path().join(RECORDS_DIR).join("run-a.json").exists());
    }

    #[tokio::test]
    async fn remote_failure_keeps_local_artifact() {
        let dir = TempDir::new().unwrap();
        let publisher = RecordPublisher::new(
            ArtifactStore::new(dir.path()),
            Arc::new(FailingDocumentSink),
        )
        .with_retry(RetryPolicy::none());

        let outcome = publisher.publish(&record("run-a")).await.unwrap();
        assert!(outcome.local_path.is_some());
        assert!(outcome.document_id.is_none());
        assert!(outcome.remote_error.unwrap().contains("document store offline"));
    }

    #[tokio::test]
    async fn local_failure_still_inserts() {
        let dir = TempDir::new().unwrap();
        // A file where the data directory should be makes every write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        let sink = Arc::new(MemoryDocumentSink::new());
        let publisher = RecordPublisher::new(ArtifactStore::new(&blocked), sink.clone());

        let outcome = publisher.publish(&record("run-a")).await.unwrap();
        assert!(outcome.local_error.is_some());
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn both_failures_are_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, "").unwrap();
        let publisher =
            RecordPublisher::new(ArtifactStore::new(&blocked), Arc::new(FailingDocumentSink))
                .with_retry(RetryPolicy::none());

        assert!(matches!(
            publisher.publish(&record("run-a")).await,
            Err(NavError::Persistence { .. })
        ));
    }
}
