use std::sync::Arc;

use chrono::NaiveDate;
use qdc_adapters::DefaultStart;
use qdc_core::SyncCheckpoint;
use qdc_storage::RecordStore;
use tracing::{debug, warn};

/// Recomputes the sync position from the store on every run.
#[derive(Clone)]
pub struct CheckpointResolver {
    store: Arc<dyn RecordStore>,
}

impl CheckpointResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// A failed store read degrades to an empty checkpoint; re-collecting from
    /// the default start is safe because writes are upserts.
    pub async fn resolve(&self, source_id: &str, collection: &str) -> SyncCheckpoint {
        match self.store.max_temporal_key(collection).await {
            Ok(last_key) => {
                debug!(source_id, collection, ?last_key, "resolved checkpoint");
                SyncCheckpoint {
                    source_id: source_id.to_string(),
                    last_key,
                }
            }
            Err(err) => {
                warn!(source_id, collection, error = %err, "checkpoint read failed; using default start");
                SyncCheckpoint::empty(source_id)
            }
        }
    }
}

pub fn start_date(checkpoint: &SyncCheckpoint, default_start: &DefaultStart, today: NaiveDate) -> NaiveDate {
    checkpoint
        .next_start()
        .unwrap_or_else(|| default_start.resolve(today))
}
