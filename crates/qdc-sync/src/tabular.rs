//! Checkpointed incremental sync for one tabular source.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use qdc_adapters::{Instrument, RawRecord, TabularSource};
use qdc_storage::{PersistOutcome, RecordStore, RemoteFetch};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument as _};
use uuid::Uuid;

use crate::checkpoint::{start_date, CheckpointResolver};
use crate::interrupt::InterruptFlag;
use crate::normalize::normalize;
use crate::window::plan_windows;
use crate::writer::UpsertWriter;

#[derive(Debug, Clone, Serialize)]
pub struct TabularRunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub collection: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub instruments: usize,
    pub windows_planned: usize,
    pub windows_fetched: usize,
    pub windows_failed: usize,
    pub rows_collected: usize,
    pub records_normalized: usize,
    pub outcome: PersistOutcome,
    pub interrupted: bool,
}

impl TabularRunSummary {
    fn new(source: &dyn TabularSource, start: NaiveDate, end: NaiveDate) -> Self {
        let profile = source.profile();
        Self {
            run_id: Uuid::new_v4(),
            source_id: profile.source_id.clone(),
            collection: profile.collection.clone(),
            start,
            end,
            instruments: 0,
            windows_planned: 0,
            windows_fetched: 0,
            windows_failed: 0,
            rows_collected: 0,
            records_normalized: 0,
            outcome: PersistOutcome::default(),
            interrupted: false,
        }
    }
}

#[derive(Clone)]
pub struct TabularSync {
    fetcher: Arc<dyn RemoteFetch>,
    checkpoints: CheckpointResolver,
    writer: UpsertWriter,
    interrupt: InterruptFlag,
}

impl TabularSync {
    pub fn new(fetcher: Arc<dyn RemoteFetch>, store: Arc<dyn RecordStore>, interrupt: InterruptFlag) -> Self {
        Self {
            fetcher,
            checkpoints: CheckpointResolver::new(store.clone()),
            writer: UpsertWriter::new(store),
            interrupt,
        }
    }

    /// Collects `[checkpoint + 1, today]` for `source`. Only a failed universe
    /// request is an error; window failures are counted and skipped. An
    /// interrupt keeps every completed window and drops the one in progress.
    pub async fn run(&self, source: &dyn TabularSource, today: NaiveDate) -> Result<TabularRunSummary> {
        let profile = source.profile();
        let span = info_span!("tabular_sync", source_id = %profile.source_id);
        self.run_inner(source, today).instrument(span).await
    }

    async fn run_inner(&self, source: &dyn TabularSource, today: NaiveDate) -> Result<TabularRunSummary> {
        let profile = source.profile();
        let checkpoint = self
            .checkpoints
            .resolve(&profile.source_id, &profile.collection)
            .await;
        let start = start_date(&checkpoint, &profile.default_start, today);
        let windows = plan_windows(start, today, source.max_span_days());

        let mut summary = TabularRunSummary::new(source, start, today);
        if windows.is_empty() {
            info!(last_key = ?checkpoint.last_key, "up to date");
            return Ok(summary);
        }

        let targets: Vec<Option<Instrument>> = match source.universe_request(today) {
            None => vec![None],
            Some(request) => {
                let response = self
                    .fetcher
                    .fetch(&profile.source_id, &request)
                    .await
                    .with_context(|| format!("fetching instrument universe for {}", profile.source_id))?;
                let universe = source
                    .parse_universe(&response.body)
                    .with_context(|| format!("parsing instrument universe for {}", profile.source_id))?;
                profile.politeness.delay().pause().await;
                universe.into_iter().map(Some).collect()
            }
        };
        summary.instruments = targets.iter().flatten().count();
        summary.windows_planned = windows.len() * targets.len();
        info!(
            %start,
            end = %today,
            windows = windows.len(),
            instruments = summary.instruments,
            "planned sync"
        );

        // Window-major so every instrument of a window lands together: the
        // checkpoint is the collection's max date, so a window persisted for
        // only some instruments would never be revisited.
        let delay = profile.politeness.delay();
        'windows: for window in &windows {
            let mut rows: Vec<RawRecord> = Vec::new();

            for target in &targets {
                if self.interrupt.is_set() {
                    summary.interrupted = true;
                    if !rows.is_empty() {
                        warn!(%window, rows = rows.len(), "dropping partially collected window");
                    }
                    break 'windows;
                }

                let instrument = target.as_ref();
                let request = source.window_request(window, instrument);
                match self.fetcher.fetch(&profile.source_id, &request).await {
                    Ok(response) => match source.parse_window(&response.body, window, instrument) {
                        Ok(page) => {
                            summary.windows_fetched += 1;
                            rows.extend(page);
                        }
                        Err(err) => {
                            summary.windows_failed += 1;
                            warn!(%window, instrument = ?instrument.map(|i| &i.code), error = %err, "skipping window with unusable payload");
                        }
                    },
                    Err(err) => {
                        summary.windows_failed += 1;
                        warn!(%window, instrument = ?instrument.map(|i| &i.code), error = %err, "skipping window after fetch failure");
                    }
                }
                delay.pause().await;
            }

            self.persist(source, &rows, &mut summary).await;
        }

        info!(
            windows_fetched = summary.windows_fetched,
            windows_failed = summary.windows_failed,
            rows = summary.rows_collected,
            inserted = summary.outcome.inserted,
            updated = summary.outcome.updated,
            interrupted = summary.interrupted,
            "sync finished"
        );
        Ok(summary)
    }

    async fn persist(&self, source: &dyn TabularSource, rows: &[RawRecord], summary: &mut TabularRunSummary) {
        summary.rows_collected += rows.len();
        if rows.is_empty() {
            return;
        }
        let records = normalize(rows, source.schema());
        summary.records_normalized += records.len();
        let outcome = self
            .writer
            .persist_records(&source.profile().collection, &records)
            .await;
        summary.outcome.merge(outcome);
    }
}
