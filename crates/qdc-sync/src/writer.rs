use std::sync::Arc;

use qdc_core::{CanonicalRecord, ReportDocument};
use qdc_storage::{PersistOutcome, RecordStore, StoredRecord};
use tracing::{info, warn};

/// Turns domain records into store rows and upserts them by natural key.
#[derive(Clone)]
pub struct UpsertWriter {
    store: Arc<dyn RecordStore>,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn persist_records(&self, collection: &str, records: &[CanonicalRecord]) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::to_value(&record.fields) {
                Ok(body) => rows.push(StoredRecord {
                    natural_key: record.natural_key.storage_key(),
                    temporal_key: record.natural_key.date(),
                    body,
                }),
                Err(err) => {
                    warn!(collection, key = %record.natural_key.storage_key(), error = %err, "record body not serializable");
                    outcome.failed += 1;
                }
            }
        }
        outcome.merge(self.store.upsert(collection, &rows).await);
        info!(
            collection,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            "persisted records"
        );
        outcome
    }

    /// Takes the crawl buffer by value; documents are keyed by URL.
    pub async fn persist_documents(&self, collection: &str, documents: Vec<ReportDocument>) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        let mut rows = Vec::with_capacity(documents.len());
        for document in documents {
            match serde_json::to_value(&document) {
                Ok(body) => rows.push(StoredRecord {
                    natural_key: document.document_url,
                    temporal_key: document.listing_date,
                    body,
                }),
                Err(err) => {
                    warn!(collection, url = %document.document_url, error = %err, "document body not serializable");
                    outcome.failed += 1;
                }
            }
        }
        outcome.merge(self.store.upsert(collection, &rows).await);
        info!(
            collection,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            "persisted documents"
        );
        outcome
    }
}
