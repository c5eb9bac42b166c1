//! HTTP fetch utilities with status-aware retry classification.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ghtrend_core::{EventSink, PipelineEvent};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info_span;
use tracing::Instrument;

use crate::retry::{RetryDisposition, RetryExecutor, RetryPolicy};

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// What to do when the remote answers 403, which GitHub uses for rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub cooldown: Duration,
    /// `None` keeps cooling down for as long as the remote says 403.
    pub max_waits: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            max_waits: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub bearer_token: Option<String>,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            default_headers: Vec::new(),
            bearer_token: None,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl HttpClientConfig {
    /// Builds a bare `reqwest` client honouring timeout, user agent and headers.
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.insert(name, value);
        }
        if let Some(token) = &self.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("invalid bearer token")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build().context("building reqwest client")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("still rate limited after {waits} cooldowns for {url}")]
    RateLimitExhausted { url: String, waits: u32 },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            FetchError::RateLimitExhausted { .. } => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryExecutor,
    rate_limit: RateLimitPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig, sink: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        let client = config.build_client()?;
        Ok(Self {
            client,
            retry: RetryExecutor::new(config.retry, sink),
            rate_limit: config.rate_limit,
        })
    }

    fn sink(&self) -> &Arc<dyn EventSink> {
        self.retry.sink()
    }

    /// GET a page as text. Any failure, HTTP status or transport, is retried
    /// up to the policy bound.
    pub async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let client = &self.client;
        self.retry
            .run(url, |_| RetryDisposition::Retryable, move || async move {
                let resp = client.get(url).query(query).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: resp.url().to_string(),
                    });
                }
                Ok(resp.text().await?)
            })
            .instrument(info_span!("http_get_text", url))
            .await
    }

    /// GET a JSON resource.
    ///
    /// - 404 resolves to `Ok(None)` without retrying.
    /// - 403 waits out the rate-limit cooldown and asks again inside the same
    ///   attempt, so it never consumes the retry budget.
    /// - 5xx, 429 and transport errors retry with exponential backoff.
    /// - Any other status fails immediately.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, FetchError> {
        self.retry
            .run(url, FetchError::disposition, move || self.get_json_once::<T>(url))
            .instrument(info_span!("http_get_json", url))
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, FetchError> {
        let mut waits = 0u32;
        loop {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();

            if status == StatusCode::NOT_FOUND {
                self.sink().emit(&PipelineEvent::ResourceMissing {
                    url: url.to_string(),
                });
                return Ok(None);
            }

            if status == StatusCode::FORBIDDEN {
                if let Some(max_waits) = self.rate_limit.max_waits {
                    if waits >= max_waits {
                        return Err(FetchError::RateLimitExhausted {
                            url: url.to_string(),
                            waits,
                        });
                    }
                }
                waits += 1;
                self.sink().emit(&PipelineEvent::RateLimited {
                    url: url.to_string(),
                    cooldown: self.rate_limit.cooldown,
                });
                tokio::time::sleep(self.rate_limit.cooldown).await;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(Some(resp.json::<T>().await?));
        }
    }
}
