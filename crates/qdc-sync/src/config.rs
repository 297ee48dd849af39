use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use qdc_adapters::{PolitenessRange, SourceProfile};
use qdc_storage::{BackoffPolicy, HttpClientConfig, RateLimitHandling, RateLimitPolicy};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub workspace_root: PathBuf,
    pub user_agent: Option<String>,
    pub http_timeout_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    pub openai_api_key: Option<String>,
    pub summary_model: String,
    pub openfigi_api_key: Option<String>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_path: env_opt("QDC_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/qdc.sqlite")),
            archive_dir: env_opt("QDC_ARCHIVE_DIR").map(PathBuf::from),
            workspace_root: env_opt("QDC_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            user_agent: env_opt("USER_AGENT"),
            http_timeout_secs: env_opt("QDC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            rate_limit_cooldown_secs: env_opt("QDC_RATE_LIMIT_COOLDOWN_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            summary_model: env_opt("QDC_SUMMARY_MODEL").unwrap_or_else(|| "gpt-4.1".to_string()),
            openfigi_api_key: env_opt("OPENFIGI_API_KEY"),
        }
    }

    /// Client settings for the shared fetcher. `handling` is `Surface` for
    /// callers that run their own rate-limit loop.
    pub fn http_config(&self, handling: RateLimitHandling) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            rate_limit: RateLimitPolicy {
                cooldown: self.rate_limit_cooldown_secs(),
                handling,
            },
            ..Default::default()
        }
    }

    /// Summaries are attempted once: a 429 or 5xx comes straight back so the
    /// document is stored as `summary_failed`.
    pub fn summary_http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            backoff: BackoffPolicy::none(),
            ..self.http_config(RateLimitHandling::Surface)
        }
    }

    pub fn rate_limit_cooldown_secs(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSettings {
    #[serde(default = "default_report_collection")]
    pub collection: String,
    /// `{page}` is replaced with the page number.
    pub company_listing_url: String,
    pub industry_listing_url: String,
    pub document_host: String,
    #[serde(default)]
    pub excluded_publishers: Vec<String>,
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    #[serde(default = "default_end_page")]
    pub end_page: u32,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub listing_politeness: PolitenessRange,
    #[serde(default = "default_document_politeness")]
    pub document_politeness: PolitenessRange,
}

impl ReportSettings {
    pub fn company_page_url(&self, page: u32) -> String {
        self.company_listing_url.replace("{page}", &page.to_string())
    }
}

fn default_report_collection() -> String {
    "naver_reports".to_string()
}

fn default_start_page() -> u32 {
    1
}

fn default_end_page() -> u32 {
    2
}

fn default_document_politeness() -> PolitenessRange {
    PolitenessRange {
        min_ms: 1000,
        max_ms: 2000,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFigiSettings {
    #[serde(default = "default_openfigi_base")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for OpenFigiSettings {
    fn default() -> Self {
        Self {
            base_url: default_openfigi_base(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_openfigi_base() -> String {
    "https://api.openfigi.com".to_string()
}

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceProfile>,
    pub reports: ReportSettings,
    #[serde(default)]
    pub openfigi: OpenFigiSettings,
}

impl SourceRegistry {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceProfile> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceProfile> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Adds a `user-agent` header to every header map that lacks one.
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        let Some(user_agent) = user_agent else {
            return self;
        };
        let maps = self
            .sources
            .iter_mut()
            .map(|s| &mut s.headers)
            .chain(std::iter::once(&mut self.reports.headers));
        for headers in maps {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
                headers.insert("user-agent".to_string(), user_agent.to_string());
            }
        }
        self
    }
}

pub fn parse_source_registry(text: &str) -> Result<SourceRegistry> {
    serde_yaml::from_str(text).context("parsing source registry")
}

pub async fn load_source_registry(path: &Path) -> Result<SourceRegistry> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
