//! In-memory document sinks for testing.

use std::sync::Mutex;

use async_trait::async_trait;

use super::DocumentSink;
use crate::error::{NavError, ProviderErrorKind};
use crate::models::NavRecord;

/// Keeps inserted records in insertion order.
#[derive(Default)]
pub struct MemoryDocumentSink {
    records: Mutex<Vec<NavRecord>>,
}

impl MemoryDocumentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NavRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentSink for MemoryDocumentSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, record: &NavRecord) -> Result<String, NavError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| NavError::provider("memory", ProviderErrorKind::Unavailable(500)))?;
        records.push(record.clone());
        Ok(format!("memory-{}", records.len()))
    }
}

/// Rejects every insert with a non-retryable error.
#[derive(Default)]
pub struct FailingDocumentSink;

#[async_trait]
impl DocumentSink for FailingDocumentSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn insert(&self, _record: &NavRecord) -> Result<String, NavError> {
        Err(NavError::provider(
            "failing",
            ProviderErrorKind::Rejected {
                status: 503,
                body: "document store offline".to_string(),
            },
        ))
    }
}
