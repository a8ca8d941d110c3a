//! MongoDB document sink.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{self, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tracing::debug;

use super::DocumentSink;
use crate::error::{NavError, ProviderErrorKind};
use crate::models::NavRecord;

const PROVIDER: &str = "mongodb";

/// Converts a record into its stored document form.
///
/// Money fields stay decimal strings; `timestamp` becomes a native BSON date so
/// dashboards can range-query it.
pub fn record_to_document(record: &NavRecord) -> Result<Document, NavError> {
    let mut doc = bson::to_document(record)
        .map_err(|e| NavError::malformed(PROVIDER, format!("failed to encode record: {e}")))?;
    doc.insert(
        "timestamp",
        bson::DateTime::from_millis(record.timestamp.timestamp_millis()),
    );
    Ok(doc)
}

fn map_error(err: mongodb::error::Error) -> NavError {
    match err.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => NavError::Auth {
            provider: PROVIDER.to_string(),
            message: message.clone(),
        },
        ErrorKind::InvalidArgument { message, .. } => NavError::config(format!("MONGO_URI: {message}")),
        _ => NavError::provider(PROVIDER, ProviderErrorKind::Network(err.to_string())),
    }
}

/// Appends records to a collection. The client connects on first insert, so
/// an unreachable database never blocks the earlier stages.
pub struct MongoDocumentSink {
    uri: SecretString,
    database: String,
    collection: String,
    timeout: Duration,
    client: OnceCell<Client>,
}

impl MongoDocumentSink {
    pub fn new(
        uri: SecretString,
        database: impl Into<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            uri,
            database: database.into(),
            collection: collection.into(),
            timeout,
            client: OnceCell::new(),
        }
    }

    async fn collection(&self) -> Result<Collection<Document>, NavError> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let mut options = ClientOptions::parse(self.uri.expose_secret())
                    .await
                    .map_err(map_error)?;
                options.app_name = Some("vaultnav".to_string());
                options.server_selection_timeout = Some(self.timeout);
                options.connect_timeout = Some(self.timeout);
                Client::with_options(options).map_err(map_error)
            })
            .await?;
        Ok(client
            .database(&self.database)
            .collection::<Document>(&self.collection))
    }
}

#[async_trait]
impl DocumentSink for MongoDocumentSink {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn insert(&self, record: &NavRecord) -> Result<String, NavError> {
        let doc = record_to_document(record)?;
        let collection = self.collection().await?;
        let result = collection.insert_one(doc).await.map_err(map_error)?;

        let id = match result.inserted_id.as_object_id() {
            Some(oid) => oid.to_hex(),
            None => result.inserted_id.to_string(),
        };
        debug!(
            database = %self.database,
            collection = %self.collection,
            id = %id,
            "record inserted"
        );
        Ok(id)
    }
}
