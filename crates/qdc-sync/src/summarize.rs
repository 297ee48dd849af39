use std::sync::Arc;

use async_trait::async_trait;
use qdc_core::DocumentType;
use qdc_storage::{FetchError, FetchRequest, RemoteFetch};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

const SOURCE_ID: &str = "openai";
const INDUSTRY_TEXT_LIMIT: usize = 20_000;

const COMPANY_INSTRUCTIONS: &str = "당신은 국내 증권사의 기업 분석 리포트를 요약합니다.\n\
- 핵심 내용을 3~6문장으로 정리하세요.\n\
- 숫자 나열보다 전망의 논리와 근거를 중심으로 쓰세요.\n\
- 목표주가(TP)와 투자의견이 있으면 반드시 포함하세요.\n\
- 면책 조항은 제외하고, 리포트에 없는 의견은 덧붙이지 마세요.";

const INDUSTRY_INSTRUCTIONS: &str = "당신은 국내 증권사의 산업 분석 리포트를 요약합니다.\n\
- 핵심 내용을 5~12문장으로 정리하세요.\n\
- 산업 전망, 성장 동력, 주요 이슈를 중심으로 논리와 근거 위주로 쓰세요.\n\
- 숫자 나열은 최소화하세요.\n\
- 면책 조항은 제외하고, 리포트에 없는 의견은 덧붙이지 마세요.";

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed summarizer response: {0}")]
    Malformed(String),
    #[error("summarizer is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, document_type: DocumentType) -> Result<String, SummarizeError>;
}

/// Used when no API key is configured; every document ends up `summary_failed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str, _document_type: DocumentType) -> Result<String, SummarizeError> {
        Err(SummarizeError::NotConfigured)
    }
}

/// OpenAI Responses API client over the shared fetcher.
pub struct OpenAiSummarizer {
    fetcher: Arc<dyn RemoteFetch>,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiSummarizer {
    pub fn new(fetcher: Arc<dyn RemoteFetch>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build_request(&self, text: &str, document_type: DocumentType) -> FetchRequest {
        let (instructions, input) = match document_type {
            DocumentType::Company => (COMPANY_INSTRUCTIONS, text),
            DocumentType::Industry => (INDUSTRY_INSTRUCTIONS, truncate_chars(text, INDUSTRY_TEXT_LIMIT)),
        };
        FetchRequest::post_json(
            format!("{}/responses", self.base_url.trim_end_matches('/')),
            json!({
                "model": self.model,
                "input": [
                    {"role": "developer", "content": instructions},
                    {"role": "user", "content": input},
                ],
                "temperature": 0.1,
            }),
        )
        .with_header("authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, text: &str, document_type: DocumentType) -> Result<String, SummarizeError> {
        let request = self.build_request(text, document_type);
        let response = self.fetcher.fetch(SOURCE_ID, &request).await?;
        let payload: JsonValue = response
            .json()
            .map_err(|e| SummarizeError::Malformed(e.to_string()))?;
        output_text(&payload)
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Concatenates every `output_text` part of every output message.
fn output_text(payload: &JsonValue) -> Result<String, SummarizeError> {
    let output = payload
        .get("output")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SummarizeError::Malformed("missing `output` array".to_string()))?;
    let text: String = output
        .iter()
        .filter_map(|item| item.get("content").and_then(JsonValue::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(JsonValue::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(JsonValue::as_str))
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return Err(SummarizeError::Malformed("response carried no output text".to_string()));
    }
    Ok(text.to_string())
}
