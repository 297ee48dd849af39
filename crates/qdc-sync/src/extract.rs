//! Page-level text extraction and the numeric-ratio page filter.

use std::sync::Arc;

use qdc_core::DocumentType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("extraction worker failed: {0}")]
    Worker(String),
}

pub trait PageTextExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfPageExtractor;

impl PageTextExtractor for PdfPageExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

/// A page is prose when digits make up strictly less than half of its
/// characters. Empty pages are not.
pub fn is_text_page(text: &str) -> bool {
    let text = text.trim();
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let digits = text.chars().filter(|c| c.is_numeric()).count();
    (digits as f64) / (total as f64) < 0.5
}

/// Joins the surviving pages with a single newline. Industry reports end in a
/// disclaimer page which is dropped first. `None` when nothing survives.
pub fn assemble_text(pages: &[String], document_type: DocumentType) -> Option<String> {
    let pages = match document_type {
        DocumentType::Industry => pages.split_last().map_or(&[][..], |(_, rest)| rest),
        DocumentType::Company => pages,
    };
    let kept: Vec<&str> = pages
        .iter()
        .map(String::as_str)
        .filter(|page| is_text_page(page))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Runs the extractor on a blocking worker so a parser panic only fails this
/// document.
pub async fn extract_document_text(
    extractor: Arc<dyn PageTextExtractor>,
    bytes: Vec<u8>,
    document_type: DocumentType,
) -> Result<Option<String>, ExtractError> {
    let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&bytes))
        .await
        .map_err(|e| ExtractError::Worker(e.to_string()))??;
    Ok(assemble_text(&pages, document_type))
}
