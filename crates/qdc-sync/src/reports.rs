//! Broker research crawl: listing, filter, download, extract, summarize, persist.

use std::sync::Arc;

use chrono::NaiveDate;
use qdc_adapters::{parse_report_listing, ListingRow};
use qdc_core::{ContentStatus, DocumentType, ReportDocument};
use qdc_storage::{DocumentArchive, FetchRequest, PersistOutcome, RecordStore, RemoteFetch};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ReportSettings;
use crate::extract::{extract_document_text, PageTextExtractor};
use crate::interrupt::InterruptFlag;
use crate::summarize::Summarizer;
use crate::writer::UpsertWriter;

pub const REPORT_SOURCE_ID: &str = "naver-research";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ExcludedPublisher,
    NotReferenceDate,
    NoDocument,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExcludedPublisher => "excluded_publisher",
            Self::NotReferenceDate => "not_reference_date",
            Self::NoDocument => "no_document",
        }
    }
}

/// Row that passed filtering: it has a document and was listed on the
/// reference date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRow {
    pub row: ListingRow,
    pub document_url: String,
    pub listing_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ReportFilter {
    excluded_publishers: Vec<String>,
    reference_date: NaiveDate,
}

impl ReportFilter {
    pub fn new(excluded_publishers: Vec<String>, reference_date: NaiveDate) -> Self {
        Self {
            excluded_publishers,
            reference_date,
        }
    }

    pub fn check(&self, row: ListingRow) -> Result<MatchedRow, SkipReason> {
        if self
            .excluded_publishers
            .iter()
            .any(|publisher| publisher.trim() == row.publisher)
        {
            return Err(SkipReason::ExcludedPublisher);
        }
        let listing_date = match row.listing_date {
            Some(date) if date == self.reference_date => date,
            _ => return Err(SkipReason::NotReferenceDate),
        };
        let document_url = row.document_url.clone().ok_or(SkipReason::NoDocument)?;
        Ok(MatchedRow {
            row,
            document_url,
            listing_date,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportRunSummary {
    pub run_id: Uuid,
    pub document_type: DocumentType,
    pub reference_date: NaiveDate,
    pub pages_requested: usize,
    pub pages_failed: usize,
    pub rows_seen: usize,
    pub rows_matched: usize,
    pub skipped_excluded_publisher: usize,
    pub skipped_not_reference_date: usize,
    pub skipped_no_document: usize,
    pub download_failures: usize,
    pub extraction_failures: usize,
    pub no_text: usize,
    pub summary_failures: usize,
    pub summarized: usize,
    pub outcome: PersistOutcome,
    pub interrupted: bool,
}

impl ReportRunSummary {
    fn new(document_type: DocumentType, reference_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_type,
            reference_date,
            pages_requested: 0,
            pages_failed: 0,
            rows_seen: 0,
            rows_matched: 0,
            skipped_excluded_publisher: 0,
            skipped_not_reference_date: 0,
            skipped_no_document: 0,
            download_failures: 0,
            extraction_failures: 0,
            no_text: 0,
            summary_failures: 0,
            summarized: 0,
            outcome: PersistOutcome::default(),
            interrupted: false,
        }
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::ExcludedPublisher => self.skipped_excluded_publisher += 1,
            SkipReason::NotReferenceDate => self.skipped_not_reference_date += 1,
            SkipReason::NoDocument => self.skipped_no_document += 1,
        }
    }

    fn record_status(&mut self, status: ContentStatus) {
        match status {
            ContentStatus::Summarized => self.summarized += 1,
            ContentStatus::SummaryFailed => self.summary_failures += 1,
            ContentStatus::NoUsableText => self.no_text += 1,
            ContentStatus::DownloadFailed => self.download_failures += 1,
            ContentStatus::ExtractionFailed => self.extraction_failures += 1,
        }
    }
}

pub struct ReportContentPipeline {
    fetcher: Arc<dyn RemoteFetch>,
    extractor: Arc<dyn PageTextExtractor>,
    summarizer: Arc<dyn Summarizer>,
    writer: UpsertWriter,
    archive: Option<DocumentArchive>,
    settings: ReportSettings,
    interrupt: InterruptFlag,
}

impl ReportContentPipeline {
    pub fn new(
        fetcher: Arc<dyn RemoteFetch>,
        extractor: Arc<dyn PageTextExtractor>,
        summarizer: Arc<dyn Summarizer>,
        store: Arc<dyn RecordStore>,
        settings: ReportSettings,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            summarizer,
            writer: UpsertWriter::new(store),
            archive: None,
            settings,
            interrupt,
        }
    }

    pub fn with_archive(mut self, archive: DocumentArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Crawls company listing pages `start_page..=end_page`.
    pub async fn run_company(&self, start_page: u32, end_page: u32, reference_date: NaiveDate) -> ReportRunSummary {
        let pages = (start_page.max(1)..=end_page)
            .map(|page| self.settings.company_page_url(page))
            .collect();
        let span = info_span!("report_crawl", document_type = "company", %reference_date);
        self.crawl(pages, DocumentType::Company, reference_date)
            .instrument(span)
            .await
    }

    /// Industry reports come from the single first listing page.
    pub async fn run_industry(&self, reference_date: NaiveDate) -> ReportRunSummary {
        let pages = vec![self.settings.industry_listing_url.clone()];
        let span = info_span!("report_crawl", document_type = "industry", %reference_date);
        self.crawl(pages, DocumentType::Industry, reference_date)
            .instrument(span)
            .await
    }

    async fn crawl(&self, pages: Vec<String>, document_type: DocumentType, reference_date: NaiveDate) -> ReportRunSummary {
        let mut summary = ReportRunSummary::new(document_type, reference_date);
        let filter = ReportFilter::new(self.settings.excluded_publishers.clone(), reference_date);
        let listing_delay = self.settings.listing_politeness.delay();
        let mut documents: Vec<ReportDocument> = Vec::new();

        'pages: for (index, page_url) in pages.iter().enumerate() {
            if self.interrupt.is_set() {
                summary.interrupted = true;
                break;
            }
            if index > 0 {
                listing_delay.pause().await;
            }

            summary.pages_requested += 1;
            let rows = match self.fetch_listing(page_url).await {
                Ok(rows) => rows,
                Err(err) => {
                    summary.pages_failed += 1;
                    warn!(page_url = %page_url, error = %err, "skipping listing page");
                    continue;
                }
            };

            for row in rows {
                summary.rows_seen += 1;
                let matched = match filter.check(row) {
                    Ok(matched) => matched,
                    Err(reason) => {
                        debug!(reason = reason.as_str(), "skipping listing row");
                        summary.record_skip(reason);
                        continue;
                    }
                };
                if self.interrupt.is_set() {
                    summary.interrupted = true;
                    break 'pages;
                }
                summary.rows_matched += 1;
                let document = self.process_row(matched, document_type).await;
                summary.record_status(document.status);
                documents.push(document);
            }
        }

        summary.outcome = self
            .writer
            .persist_documents(&self.settings.collection, documents)
            .await;
        info!(
            pages = summary.pages_requested,
            rows = summary.rows_seen,
            matched = summary.rows_matched,
            summarized = summary.summarized,
            inserted = summary.outcome.inserted,
            updated = summary.outcome.updated,
            interrupted = summary.interrupted,
            "report crawl finished"
        );
        summary
    }

    async fn fetch_listing(&self, page_url: &str) -> anyhow::Result<Vec<ListingRow>> {
        let request = FetchRequest::get(page_url).with_headers(self.settings.headers.clone());
        let response = self.fetcher.fetch(REPORT_SOURCE_ID, &request).await?;
        Ok(parse_report_listing(&response.text(), &self.settings.document_host)?)
    }

    /// Never fails: every stage failure is recorded on the document instead.
    async fn process_row(&self, matched: MatchedRow, document_type: DocumentType) -> ReportDocument {
        let MatchedRow {
            row,
            document_url,
            listing_date,
        } = matched;
        let mut document = ReportDocument {
            document_url,
            publisher: row.publisher,
            title: row.title,
            subject_name: row.subject_name,
            document_type,
            listing_date,
            extracted_text: String::new(),
            summary: String::new(),
            status: ContentStatus::DownloadFailed,
            failure: None,
            content_hash: None,
        };

        let request = FetchRequest::get(document.document_url.as_str()).with_headers(self.settings.headers.clone());
        let fetched = self.fetcher.fetch(REPORT_SOURCE_ID, &request).await;
        self.settings.document_politeness.delay().pause().await;
        let bytes = match fetched {
            Ok(response) => response.body,
            Err(err) => {
                warn!(url = %document.document_url, error = %err, "document download failed");
                document.failure = Some(err.to_string());
                return document;
            }
        };

        document.content_hash = Some(DocumentArchive::content_hash(&bytes));
        if let Some(archive) = &self.archive {
            if let Err(err) = archive.archive(listing_date, "pdf", &bytes).await {
                warn!(url = %document.document_url, error = %err, "archiving document failed");
            }
        }

        let text = match extract_document_text(self.extractor.clone(), bytes, document_type).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(url = %document.document_url, "no page passed the text filter");
                document.status = ContentStatus::NoUsableText;
                return document;
            }
            Err(err) => {
                warn!(url = %document.document_url, error = %err, "text extraction failed");
                document.status = ContentStatus::ExtractionFailed;
                document.failure = Some(err.to_string());
                return document;
            }
        };

        match self.summarizer.summarize(&text, document_type).await {
            Ok(summary) => {
                document.summary = summary;
                document.status = ContentStatus::Summarized;
            }
            Err(err) => {
                warn!(url = %document.document_url, error = %err, "summarization failed");
                document.summary = format!("summary failed: {err}");
                document.status = ContentStatus::SummaryFailed;
                document.failure = Some(err.to_string());
            }
        }
        document.extracted_text = text;
        document
    }
}
