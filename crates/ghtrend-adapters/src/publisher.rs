//! Blog publish payload and endpoint client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use ghtrend_core::ArticleRecord;
use ghtrend_storage::RetryDisposition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AdapterError, BlogPublisher};

pub const ARTICLE_CATEGORY: &str = "Technology";
const BASE_TAGS: [&str; 3] = ["GitHub", "Tech", "OpenSource"];

/// `github-trend-{repo}-{date}` with the repo lowercased and `_`/`.` turned
/// into `-`.
pub fn generate_slug(repo: &str, date: NaiveDate) -> String {
    let repo = repo.to_lowercase().replace(['_', '.'], "-");
    format!("github-trend-{repo}-{}", date.format("%Y-%m-%d"))
}

pub fn generate_title(owner: &str, repo: &str) -> String {
    format!("GitHub Trend Explained: {owner}/{repo}")
}

pub fn generate_tags(license: Option<&str>) -> Vec<String> {
    let mut tags: Vec<String> = BASE_TAGS.iter().map(|t| t.to_string()).collect();
    if license.is_some_and(|l| l.contains("MIT")) {
        tags.push("MIT".to_string());
    }
    tags
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    pub slug: String,
    pub title: String,
    pub body: String,
    pub category: String,
    pub tags: Vec<String>,
    pub status: String,
    pub publish_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_image_url: Option<String>,
}

impl PublishPayload {
    pub fn for_article(record: &ArticleRecord, now: DateTime<Utc>, header_image_url: Option<&str>) -> Self {
        Self {
            slug: generate_slug(&record.repo, now.date_naive()),
            title: generate_title(&record.owner, &record.repo),
            body: record.generated_body.clone(),
            category: ARTICLE_CATEGORY.to_string(),
            tags: generate_tags(record.license_name.as_deref()),
            status: "published".to_string(),
            publish_at: now.to_rfc3339_opts(SecondsFormat::Micros, false),
            header_image_url: header_image_url.filter(|u| !u.is_empty()).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Client error {status}: {body}")]
    Client { status: u16, body: String },
    #[error("Request error: {0}")]
    Network(String),
}

impl PublishError {
    /// Server and transport failures retry; client errors never do.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            PublishError::Server { .. } | PublishError::Network(_) => RetryDisposition::Retryable,
            PublishError::Client { .. } => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBlogPublisher {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpBlogPublisher {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl BlogPublisher for HttpBlogPublisher {
    async fn publish(&self, payload: &PublishPayload) -> Result<PublishAck, PublishError> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(PublishAck {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let status = status.as_u16();
        Err(if (500..600).contains(&status) {
            PublishError::Server { status, body }
        } else {
            PublishError::Client { status, body }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ghtrend_core::ArticleStatus;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(license: Option<&str>) -> ArticleRecord {
        ArticleRecord {
            id: 7,
            period_key: "2025-W41".into(),
            owner: "acme".into(),
            repo: "Widget_Kit.rs".into(),
            content_version: "abc123".into(),
            star_count: 1,
            license_name: license.map(str::to_string),
            last_push_timestamp: None,
            source_document_text: None,
            generated_body: "## Intro".into(),
            status: ArticleStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            posted_at: None,
        }
    }

    fn payload() -> PublishPayload {
        let now = Utc.with_ymd_and_hms(2025, 10, 6, 9, 30, 0).unwrap();
        PublishPayload::for_article(&record(Some("MIT License")), now, None)
    }

    #[test]
    fn slug_is_deterministic_for_repo_and_date() {
        let date = NaiveDate::from_ymd_opt(2025, 10, 6).unwrap();
        assert_eq!(
            generate_slug("anthropic_sdk.python", date),
            "github-trend-anthropic-sdk-python-2025-10-06"
        );
    }

    #[test]
    fn mit_tag_only_for_mit_licenses() {
        assert_eq!(generate_tags(Some("MIT License")), ["GitHub", "Tech", "OpenSource", "MIT"]);
        assert_eq!(generate_tags(Some("Apache License 2.0")), ["GitHub", "Tech", "OpenSource"]);
        assert_eq!(generate_tags(None).len(), 3);
    }

    #[test]
    fn payload_serializes_camel_case() {
        let now = Utc.with_ymd_and_hms(2025, 10, 6, 9, 30, 0).unwrap();
        let with_image =
            PublishPayload::for_article(&record(None), now, Some("https://img.example/header.png"));
        let value = serde_json::to_value(&with_image).unwrap();
        assert_eq!(value["slug"], "github-trend-widget-kit-rs-2025-10-06");
        assert_eq!(value["title"], "GitHub Trend Explained: acme/Widget_Kit.rs");
        assert_eq!(value["status"], "published");
        assert_eq!(value["category"], ARTICLE_CATEGORY);
        assert_eq!(value["headerImageUrl"], "https://img.example/header.png");
        assert!(value["publishAt"].as_str().unwrap().starts_with("2025-10-06T09:30:00"));

        let without = serde_json::to_value(payload()).unwrap();
        assert!(without.get("headerImageUrl").is_none());
    }

    #[tokio::test]
    async fn accepted_post_returns_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/posts"))
            .and(header("x-api-key", "blog-key"))
            .and(body_partial_json(json!({"status": "published", "tags": ["GitHub", "Tech", "OpenSource", "MIT"]})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let publisher =
            HttpBlogPublisher::new(format!("{}/api/posts", server.uri()), "blog-key", Duration::from_secs(5))
                .unwrap();
        let ack = publisher.publish(&payload()).await.unwrap();
        assert_eq!(ack.status, 201);
    }

    #[tokio::test]
    async fn error_statuses_carry_body_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("slug taken"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let publisher = HttpBlogPublisher::new(server.uri(), "k", Duration::from_secs(5)).unwrap();

        let client = publisher.publish(&payload()).await.unwrap_err();
        assert_eq!(client.to_string(), "Client error 422: slug taken");
        assert_eq!(client.disposition(), RetryDisposition::NonRetryable);

        let server_err = publisher.publish(&payload()).await.unwrap_err();
        assert_eq!(server_err.to_string(), "Server error 503: maintenance");
        assert_eq!(server_err.disposition(), RetryDisposition::Retryable);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let publisher =
            HttpBlogPublisher::new("http://127.0.0.1:9/posts", "k", Duration::from_millis(200)).unwrap();
        let err = publisher.publish(&payload()).await.unwrap_err();
        assert!(matches!(err, PublishError::Network(_)));
        assert!(err.to_string().starts_with("Request error: "));
    }
}
