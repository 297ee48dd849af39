//! Resilient HTTP fetch primitive shared by every collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(JsonValue),
    Text { content_type: String, body: String },
}

/// Fully constructed outbound request. Sources build these; only the fetcher sends them.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_form<I, K, V>(url: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Form(
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn post_json(url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_text(
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Text {
                content_type: content_type.into(),
                body: body.into(),
            },
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn ok(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            final_url: url.into(),
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Decodes the body with the `charset` named in the content type, UTF-8
    /// when absent or unknown.
    pub fn text(&self) -> String {
        let encoding = self
            .content_type
            .as_deref()
            .and_then(charset_label)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&self.body);
        text.into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    RateLimited,
    Permanent,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure for {url}: {detail}")]
    Transient { url: String, detail: String },
    #[error("rate limited (429) by {url}")]
    RateLimited { url: String },
    #[error("permanent failure for {url}: {detail}")]
    Permanent {
        url: String,
        status: Option<u16>,
        detail: String,
    },
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient { .. } => FailureClass::Transient,
            Self::RateLimited { .. } => FailureClass::RateLimited,
            Self::Permanent { .. } => FailureClass::Permanent,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Transient { url, .. } | Self::RateLimited { url } | Self::Permanent { url, .. } => {
                url
            }
        }
    }

    fn from_status(status: StatusCode, url: String) -> Self {
        match classify_status(status) {
            FailureClass::RateLimited => Self::RateLimited { url },
            FailureClass::Transient => Self::Transient {
                url,
                detail: format!("http status {}", status.as_u16()),
            },
            FailureClass::Permanent => Self::Permanent {
                url,
                status: Some(status.as_u16()),
                detail: format!("http status {}", status.as_u16()),
            },
        }
    }

    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        match classify_reqwest_error(&err) {
            FailureClass::Permanent => Self::Permanent {
                url: url.to_string(),
                status: err.status().map(|s| s.as_u16()),
                detail: err.to_string(),
            },
            _ => Self::Transient {
                url: url.to_string(),
                detail: err.to_string(),
            },
        }
    }
}

pub fn classify_status(status: StatusCode) -> FailureClass {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FailureClass::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        FailureClass::Transient
    } else {
        FailureClass::Permanent
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitHandling {
    /// Sleep `cooldown` and resend the same request; does not consume the retry budget.
    CooldownAndRetry,
    /// Hand `FetchError::RateLimited` back to the caller.
    Surface,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub cooldown: Duration,
    pub handling: RateLimitHandling,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            handling: RateLimitHandling::CooldownAndRetry,
        }
    }
}

/// Randomized pause between independent requests to one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolitenessDelay {
    pub min: Duration,
    pub max: Duration,
}

impl PolitenessDelay {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::between(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub fn sample(&self) -> Duration {
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        if max_ms <= min_ms {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Injected network capability. `HttpFetcher` is the production implementation.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub rate_limit: RateLimitPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 1,
            backoff: BackoffPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
    rate_limit: RateLimitPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
            rate_limit: config.rate_limit,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    async fn send_once(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Text { content_type, body } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(body.clone()),
        };

        let resp = builder
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(&request.url, err))?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            return Err(FetchError::from_status(status, final_url));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| FetchError::from_reqwest(&final_url, err))?
            .to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }

    async fn send_with_policy(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0usize;
        loop {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(FetchError::RateLimited { url }) => match self.rate_limit.handling {
                    RateLimitHandling::CooldownAndRetry => {
                        warn!(
                            %url,
                            cooldown_secs = self.rate_limit.cooldown.as_secs_f64(),
                            "rate limited; cooling down before resending"
                        );
                        tokio::time::sleep(self.rate_limit.cooldown).await;
                    }
                    RateLimitHandling::Surface => return Err(FetchError::RateLimited { url }),
                },
                Err(err)
                    if err.class() == FailureClass::Transient
                        && attempt < self.backoff.max_retries =>
                {
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        error = %err,
                        attempt,
                        max_retries = self.backoff.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient fetch failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl RemoteFetch for HttpFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let closed = || FetchError::Permanent {
            url: request.url.clone(),
            status: None,
            detail: "fetcher is shutting down".to_string(),
        };
        let _global = self.global_limit.acquire().await.map_err(|_| closed())?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.map_err(|_| closed())?;

        let span = info_span!("http_fetch", source_id, url = %request.url);
        self.send_with_policy(request).instrument(span).await
    }
}
