use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use qdc_adapters::SourceProfile;
use qdc_storage::{DocumentArchive, HttpFetcher, RateLimitHandling, RecordStore, RemoteFetch, SqliteStore};
use qdc_sync::{
    load_source_registry, run_tabular_sync, DisabledSummarizer, IdentifierBatchMapper, InterruptFlag,
    MapperSettings, OpenAiSummarizer, OpenFigiSettings, PdfPageExtractor, ReportContentPipeline, ReportRunSummary,
    SourceRegistry, Summarizer, SyncConfig, TabularSync,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "qdc")]
#[command(about = "Quant data collector: incremental market data sync and research report summaries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the record store schema.
    Migrate,
    /// Incrementally sync tabular sources from their checkpoints.
    Sync {
        /// Source id from sources.yaml; repeatable. Defaults to every enabled source.
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Run sources in parallel tasks.
        #[arg(long)]
        concurrent: bool,
    },
    /// Crawl, extract and summarize broker research reports.
    Reports {
        #[command(subcommand)]
        kind: ReportCommand,
    },
    /// Resolve ISINs to tickers through OpenFIGI and print the mapping as JSON.
    MapIsin {
        #[arg(long)]
        batch_size: Option<usize>,
        /// File with one ISIN per line.
        #[arg(long)]
        input: Option<PathBuf>,
        isins: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    Company {
        #[arg(long)]
        start_page: Option<u32>,
        #[arg(long)]
        end_page: Option<u32>,
        /// Listing date to collect (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Industry {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command {
        Commands::MapIsin {
            batch_size,
            input,
            isins,
        } => map_isin(&config, batch_size, input, isins).await,
        command => {
            let store = SqliteStore::open(&config.database_path)
                .await
                .with_context(|| format!("opening store at {}", config.database_path.display()))?;
            let result = run_with_store(command, &config, &store).await;
            store.close().await;
            result
        }
    }
}

async fn run_with_store(command: Commands, config: &SyncConfig, store: &SqliteStore) -> Result<()> {
    store.migrate().await.context("migrating record store")?;
    let shared: Arc<dyn RecordStore> = Arc::new(store.clone());

    match command {
        Commands::Migrate => {
            println!("migrate complete: database={}", config.database_path.display());
        }
        Commands::Sync {
            sources,
            concurrent,
        } => {
            let registry = load_registry(config).await?;
            let profiles = select_profiles(&registry, &sources)?;
            let interrupt = InterruptFlag::new();
            interrupt.listen_for_ctrl_c();
            let fetcher = http_fetcher(config, RateLimitHandling::CooldownAndRetry)?;
            let sync = TabularSync::new(fetcher, shared, interrupt);

            let summary = run_tabular_sync(&sync, profiles, today(), concurrent).await;
            for source in &summary.sources {
                println!(
                    "{}: windows={}/{} failed={} rows={} inserted={} updated={} unchanged={} interrupted={}",
                    source.source_id,
                    source.windows_fetched,
                    source.windows_planned,
                    source.windows_failed,
                    source.rows_collected,
                    source.outcome.inserted,
                    source.outcome.updated,
                    source.outcome.unchanged,
                    source.interrupted,
                );
            }
            println!(
                "sync complete: run_id={} sources={} failed={}",
                summary.run_id,
                summary.sources.len(),
                summary.failed_sources.len()
            );
        }
        Commands::Reports { kind } => {
            let registry = load_registry(config).await?;
            let settings = registry.reports;
            let interrupt = InterruptFlag::new();
            interrupt.listen_for_ctrl_c();
            let fetcher = http_fetcher(config, RateLimitHandling::CooldownAndRetry)?;
            let summarizer: Arc<dyn Summarizer> = match &config.openai_api_key {
                Some(key) => {
                    let summary_fetcher: Arc<dyn RemoteFetch> =
                        Arc::new(HttpFetcher::new(config.summary_http_config())?);
                    Arc::new(OpenAiSummarizer::new(summary_fetcher, key.clone(), config.summary_model.clone()))
                }
                None => {
                    warn!("OPENAI_API_KEY is not set; documents will be stored without summaries");
                    Arc::new(DisabledSummarizer)
                }
            };
            let default_pages = (settings.start_page, settings.end_page);
            let mut pipeline = ReportContentPipeline::new(
                fetcher,
                Arc::new(PdfPageExtractor),
                summarizer,
                shared,
                settings,
                interrupt,
            );
            if let Some(dir) = &config.archive_dir {
                pipeline = pipeline.with_archive(DocumentArchive::new(dir.clone()));
            }

            let summary = match kind {
                ReportCommand::Company {
                    start_page,
                    end_page,
                    date,
                } => {
                    pipeline
                        .run_company(
                            start_page.unwrap_or(default_pages.0),
                            end_page.unwrap_or(default_pages.1),
                            date.unwrap_or_else(today),
                        )
                        .await
                }
                ReportCommand::Industry { date } => pipeline.run_industry(date.unwrap_or_else(today)).await,
            };
            print_report_summary(&summary);
        }
        Commands::MapIsin { .. } => bail!("map-isin does not use the record store"),
    }

    Ok(())
}

async fn map_isin(config: &SyncConfig, batch_size: Option<usize>, input: Option<PathBuf>, isins: Vec<String>) -> Result<()> {
    let mut identifiers = isins;
    if let Some(path) = input {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        identifiers.extend(text.lines().map(str::to_string));
    }
    let mut seen = BTreeSet::new();
    let identifiers: Vec<String> = identifiers
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();
    if identifiers.is_empty() {
        bail!("no ISINs given; pass them as arguments or with --input");
    }

    let figi = match load_registry(config).await {
        Ok(registry) => registry.openfigi,
        Err(err) => {
            warn!(error = format!("{err:#}"), "using default OpenFIGI settings");
            OpenFigiSettings::default()
        }
    };
    let settings = MapperSettings {
        base_url: figi.base_url,
        api_key: config.openfigi_api_key.clone(),
        batch_size: batch_size.unwrap_or(figi.batch_size),
        cooldown: config.rate_limit_cooldown_secs(),
        ..Default::default()
    };
    let interrupt = InterruptFlag::new();
    interrupt.listen_for_ctrl_c();
    let fetcher = http_fetcher(config, RateLimitHandling::Surface)?;

    let report = IdentifierBatchMapper::new(fetcher, settings, interrupt)
        .map(&identifiers)
        .await;
    info!(
        requested = identifiers.len(),
        mapped = report.mappings.len(),
        "map-isin complete"
    );
    println!("{}", serde_json::to_string(&report).context("serializing mapping report")?);
    Ok(())
}

async fn load_registry(config: &SyncConfig) -> Result<SourceRegistry> {
    Ok(load_source_registry(&config.sources_path())
        .await?
        .with_user_agent(config.user_agent.as_deref()))
}

fn select_profiles(registry: &SourceRegistry, requested: &[String]) -> Result<Vec<SourceProfile>> {
    if requested.is_empty() {
        return Ok(registry.enabled_sources().cloned().collect());
    }
    requested
        .iter()
        .map(|id| {
            registry
                .source(id)
                .cloned()
                .with_context(|| format!("unknown source `{id}` in sources.yaml"))
        })
        .collect()
}

fn http_fetcher(config: &SyncConfig, handling: RateLimitHandling) -> Result<Arc<dyn RemoteFetch>> {
    Ok(Arc::new(HttpFetcher::new(config.http_config(handling))?))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_report_summary(summary: &ReportRunSummary) {
    println!(
        "reports complete: type={} date={} pages={} rows={} matched={} summarized={} failed_downloads={} no_text={} inserted={} updated={} unchanged={} interrupted={}",
        summary.document_type,
        summary.reference_date,
        summary.pages_requested,
        summary.rows_seen,
        summary.rows_matched,
        summary.summarized,
        summary.download_failures,
        summary.no_text,
        summary.outcome.inserted,
        summary.outcome.updated,
        summary.outcome.unchanged,
        summary.interrupted,
    );
}
