//! Orchestration: incremental tabular sync, the report content pipeline and
//! the identifier mapper, plus their configuration.

use chrono::{DateTime, NaiveDate, Utc};
use qdc_adapters::{tabular_source_for, SourceProfile};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

pub mod checkpoint;
pub mod config;
pub mod extract;
pub mod figi;
pub mod interrupt;
pub mod normalize;
pub mod reports;
pub mod summarize;
pub mod tabular;
pub mod window;
pub mod writer;

pub use checkpoint::{start_date, CheckpointResolver};
pub use config::{
    load_source_registry, parse_source_registry, OpenFigiSettings, ReportSettings, SourceRegistry, SyncConfig,
};
pub use extract::{assemble_text, is_text_page, ExtractError, PageTextExtractor, PdfPageExtractor};
pub use figi::{IdentifierBatchMapper, MapperSettings, MappingReport};
pub use interrupt::InterruptFlag;
pub use normalize::normalize;
pub use reports::{ReportContentPipeline, ReportFilter, ReportRunSummary, SkipReason, REPORT_SOURCE_ID};
pub use summarize::{DisabledSummarizer, OpenAiSummarizer, SummarizeError, Summarizer};
pub use tabular::{TabularRunSummary, TabularSync};
pub use window::plan_windows;
pub use writer::UpsertWriter;

pub const CRATE_NAME: &str = "qdc-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<TabularRunSummary>,
    pub failed_sources: Vec<String>,
}

/// Syncs each profile once. Sources address disjoint collections, so
/// `concurrent` only changes wall-clock time; a source that fails is reported
/// and the others still run.
pub async fn run_tabular_sync(
    sync: &TabularSync,
    profiles: Vec<SourceProfile>,
    today: NaiveDate,
    concurrent: bool,
) -> SyncRunSummary {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    let mut sources = Vec::new();
    let mut failed_sources = Vec::new();

    if concurrent {
        let mut tasks = JoinSet::new();
        for profile in profiles {
            let sync = sync.clone();
            tasks.spawn(async move {
                let source_id = profile.source_id.clone();
                let source = tabular_source_for(profile);
                (source_id, sync.run(source.as_ref(), today).await)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(summary))) => sources.push(summary),
                Ok((source_id, Err(err))) => {
                    error!(%source_id, error = format!("{err:#}"), "source sync failed");
                    failed_sources.push(source_id);
                }
                Err(err) => {
                    error!(error = %err, "source sync task aborted");
                    failed_sources.push("<aborted task>".to_string());
                }
            }
        }
    } else {
        for profile in profiles {
            let source_id = profile.source_id.clone();
            let source = tabular_source_for(profile);
            match sync.run(source.as_ref(), today).await {
                Ok(summary) => sources.push(summary),
                Err(err) => {
                    error!(%source_id, error = format!("{err:#}"), "source sync failed");
                    failed_sources.push(source_id);
                }
            }
        }
    }

    let finished_at = Utc::now();
    info!(
        %run_id,
        sources = sources.len(),
        failed = failed_sources.len(),
        elapsed_ms = (finished_at - started_at).num_milliseconds(),
        "sync run finished"
    );
    SyncRunSummary {
        run_id,
        started_at,
        finished_at,
        sources,
        failed_sources,
    }
}
