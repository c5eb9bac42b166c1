//! GitHub REST lookups for README documents and repository metadata.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ghtrend_core::{EventSink, UNKNOWN};
use ghtrend_storage::{HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use tracing::warn;

use crate::{AdapterError, RepositoryService};

const API_ACCEPT: &str = "application/vnd.github.v3+json";
const API_USER_AGENT: &str = "GitHub-Trend-Auto-Blog/1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadmeDocument {
    /// Blob sha; the content version used for deduplication.
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadata {
    pub stars: u64,
    pub license: String,
    pub last_push: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct LicenseInfo {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    stargazers_count: u64,
    license: Option<LicenseInfo>,
    pushed_at: Option<String>,
}

impl From<RepoResponse> for RepoMetadata {
    fn from(value: RepoResponse) -> Self {
        Self {
            stars: value.stargazers_count,
            license: value
                .license
                .and_then(|l| l.name)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            last_push: value.pushed_at,
        }
    }
}

/// Decodes the API's base64 transport encoding. The payload arrives wrapped
/// at 60 columns; invalid UTF-8 is replaced rather than rejected.
pub fn decode_document_content(raw: &str) -> Result<String, AdapterError> {
    let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| AdapterError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone)]
pub struct GitHubApi {
    http: HttpFetcher,
    base_url: String,
}

impl GitHubApi {
    pub fn new(
        base_url: impl Into<String>,
        mut config: HttpClientConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, AdapterError> {
        if config.bearer_token.is_none() {
            warn!("no GitHub token configured; API requests are limited to 60 per hour");
        }
        if config.user_agent.is_none() {
            config.user_agent = Some(API_USER_AGENT.to_string());
        }
        config
            .default_headers
            .push(("Accept".to_string(), API_ACCEPT.to_string()));
        Ok(Self {
            http: HttpFetcher::new(config, sink)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{owner}/{repo}", self.base_url)
    }
}

#[async_trait]
impl RepositoryService for GitHubApi {
    async fn fetch_document(&self, owner: &str, repo: &str) -> Result<Option<ReadmeDocument>, AdapterError> {
        let url = format!("{}/readme", self.repo_url(owner, repo));
        let Some(resp) = self.http.get_json::<ReadmeResponse>(&url).await? else {
            return Ok(None);
        };
        let content = decode_document_content(&resp.content)?;
        Ok(Some(ReadmeDocument {
            sha: resp.sha,
            content,
        }))
    }

    async fn fetch_metadata(&self, owner: &str, repo: &str) -> Result<Option<RepoMetadata>, AdapterError> {
        let url = self.repo_url(owner, repo);
        Ok(self
            .http
            .get_json::<RepoResponse>(&url)
            .await?
            .map(RepoMetadata::from))
    }
}
