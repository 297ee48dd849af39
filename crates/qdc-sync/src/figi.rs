//! Batched ISIN to ticker resolution against OpenFIGI.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use qdc_adapters::{build_mapping_request, parse_mapping_response, MappingResult};
use qdc_core::IdentifierMapping;
use qdc_storage::{FetchError, RemoteFetch};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::interrupt::InterruptFlag;

const SOURCE_ID: &str = "openfigi";
const ANONYMOUS_BATCH_CAP: usize = 5;

#[derive(Debug, Clone)]
pub struct MapperSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub cooldown: Duration,
    pub authenticated_pause: Duration,
    pub anonymous_pause: Duration,
    pub failure_pause: Duration,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openfigi.com".to_string(),
            api_key: None,
            batch_size: 10,
            cooldown: Duration::from_secs(60),
            authenticated_pause: Duration::from_millis(300),
            anonymous_pause: Duration::from_millis(2500),
            failure_pause: Duration::from_secs(5),
        }
    }
}

impl MapperSettings {
    /// The anonymous tier has a stricter quota, so its batches are capped.
    pub fn effective_batch_size(&self) -> usize {
        let size = if self.api_key.is_some() {
            self.batch_size
        } else {
            self.batch_size.min(ANONYMOUS_BATCH_CAP)
        };
        size.max(1)
    }

    fn batch_pause(&self) -> Duration {
        if self.api_key.is_some() {
            self.authenticated_pause
        } else {
            self.anonymous_pause
        }
    }
}

/// Partial results are kept whatever happens to later batches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MappingReport {
    pub mappings: BTreeMap<String, String>,
    pub batches: usize,
    pub warnings: usize,
    pub errors: usize,
    pub failed_batches: usize,
    pub interrupted: bool,
}

impl MappingReport {
    pub fn identifier_mappings(&self) -> Vec<IdentifierMapping> {
        self.mappings
            .iter()
            .map(|(source_id, resolved_symbol)| IdentifierMapping {
                source_id: source_id.clone(),
                resolved_symbol: resolved_symbol.clone(),
            })
            .collect()
    }
}

/// `fetcher` must surface 429s (`RateLimitHandling::Surface`); the mapper
/// owns the cooldown so it can resend the same batch.
pub struct IdentifierBatchMapper {
    fetcher: Arc<dyn RemoteFetch>,
    settings: MapperSettings,
    interrupt: InterruptFlag,
}

impl IdentifierBatchMapper {
    pub fn new(fetcher: Arc<dyn RemoteFetch>, settings: MapperSettings, interrupt: InterruptFlag) -> Self {
        Self {
            fetcher,
            settings,
            interrupt,
        }
    }

    pub async fn map(&self, identifiers: &[String]) -> MappingReport {
        let batch_size = self.settings.effective_batch_size();
        let batches: Vec<&[String]> = identifiers.chunks(batch_size).collect();
        let mut report = MappingReport::default();
        info!(identifiers = identifiers.len(), batches = batches.len(), batch_size, "mapping identifiers");

        let mut index = 0;
        while index < batches.len() {
            if self.interrupt.is_set() {
                report.interrupted = true;
                warn!(completed = index, remaining = batches.len() - index, "mapping interrupted");
                break;
            }

            let batch = batches[index];
            let request = build_mapping_request(
                &self.settings.base_url,
                batch,
                self.settings.api_key.as_deref(),
            );
            let response = match self.fetcher.fetch(SOURCE_ID, &request).await {
                Ok(response) => response,
                Err(FetchError::RateLimited { .. }) => {
                    warn!(
                        batch = index + 1,
                        cooldown_secs = self.settings.cooldown.as_secs_f64(),
                        "rate limited; retrying the same batch after cooldown"
                    );
                    tokio::time::sleep(self.settings.cooldown).await;
                    continue;
                }
                Err(err) => {
                    warn!(batch = index + 1, error = %err, "mapping batch failed");
                    report.failed_batches += 1;
                    index += 1;
                    tokio::time::sleep(self.settings.failure_pause).await;
                    continue;
                }
            };

            match parse_mapping_response(&response.body) {
                Ok(results) => {
                    if results.len() != batch.len() {
                        warn!(
                            batch = index + 1,
                            requested = batch.len(),
                            returned = results.len(),
                            "response length differs from request; aligning by position"
                        );
                    }
                    for (identifier, result) in batch.iter().zip(results) {
                        match result {
                            MappingResult::Matched(symbol) => {
                                report.mappings.insert(identifier.clone(), symbol);
                            }
                            MappingResult::Warning(message) => {
                                report.warnings += 1;
                                debug!(%identifier, %message, "no mapping");
                            }
                            MappingResult::Error(message) => {
                                report.errors += 1;
                                warn!(%identifier, %message, "mapping error");
                            }
                            MappingResult::Empty => debug!(%identifier, "empty mapping"),
                        }
                    }
                    report.batches += 1;
                    index += 1;
                    if index < batches.len() {
                        let pause = self.settings.batch_pause();
                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
                Err(err) => {
                    warn!(batch = index + 1, error = %err, "unreadable mapping response");
                    report.failed_batches += 1;
                    index += 1;
                    tokio::time::sleep(self.settings.failure_pause).await;
                }
            }
        }

        info!(
            mapped = report.mappings.len(),
            warnings = report.warnings,
            errors = report.errors,
            failed_batches = report.failed_batches,
            "mapping finished"
        );
        report
    }
}
