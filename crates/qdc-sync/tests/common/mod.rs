#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use qdc_core::DocumentType;
use qdc_storage::{FetchError, FetchRequest, FetchedResponse, RemoteFetch, SqliteStore};
use qdc_sync::{ExtractError, PageTextExtractor, SummarizeError, Summarizer};

type Handler = dyn Fn(&FetchRequest, usize) -> Result<FetchedResponse, FetchError> + Send + Sync;

/// Answers requests from a closure and records every call.
pub struct ScriptedFetch {
    handler: Box<Handler>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetch {
    /// `handler` receives the request and its zero-based call index.
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&FetchRequest, usize) -> Result<FetchedResponse, FetchError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteFetch for ScriptedFetch {
    async fn fetch(&self, _source_id: &str, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len() - 1
        };
        (self.handler)(request, index)
    }
}

/// Treats the document bytes as UTF-8 with pages separated by form feeds.
pub struct FakeExtractor;

impl PageTextExtractor for FakeExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(text.split('\u{c}').map(str::to_string).collect())
    }
}

/// Returns the first sentence of the text, or fails when told to.
pub struct FakeSummarizer {
    pub fail: bool,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str, document_type: DocumentType) -> Result<String, SummarizeError> {
        if self.fail {
            return Err(SummarizeError::Malformed("model unavailable".into()));
        }
        let first = text.split('.').next().unwrap_or_default().trim();
        Ok(format!("[{document_type}] {first}."))
    }
}

pub async fn memory_store() -> Arc<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store.migrate().await.unwrap();
    Arc::new(store)
}

pub fn ok(request: &FetchRequest, body: impl Into<Vec<u8>>) -> Result<FetchedResponse, FetchError> {
    Ok(FetchedResponse::ok(request.url.clone(), body))
}
