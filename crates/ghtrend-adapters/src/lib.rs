//! External collaborator contracts + their HTTP implementations.
//!
//! Stages only see the traits below. Listing and repository lookups retry
//! inside [`ghtrend_storage::HttpFetcher`]; generation and publication are
//! single attempts whose errors expose a [`RetryDisposition`] so the calling
//! stage decides how to retry them.

use async_trait::async_trait;
use ghtrend_core::Candidate;
use ghtrend_storage::{FetchError, RetryDisposition};
use thiserror::Error;

pub mod generator;
pub mod github;
pub mod listing;
pub mod publisher;

pub use generator::{
    build_generation_request, AnthropicConfig, AnthropicGenerator, GeneratedArticle,
    GenerationError, GenerationRequest, SYSTEM_INSTRUCTION,
};
pub use github::{decode_document_content, GitHubApi, ReadmeDocument, RepoMetadata};
pub use listing::{parse_trending_listing, GitHubTrendingSource, TrendingQuery};
pub use publisher::{
    generate_slug, generate_tags, generate_title, HttpBlogPublisher, PublishAck, PublishError,
    PublishPayload, ARTICLE_CATEGORY,
};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not decode document content: {0}")]
    Decode(String),
    #[error("could not parse listing: {0}")]
    Parse(String),
    #[error("client setup failed: {0}")]
    Setup(String),
}

impl AdapterError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            AdapterError::Fetch(err) => err.disposition(),
            _ => RetryDisposition::NonRetryable,
        }
    }
}

impl From<anyhow::Error> for AdapterError {
    fn from(err: anyhow::Error) -> Self {
        AdapterError::Setup(format!("{err:#}"))
    }
}

/// Ranked listing of repositories, e.g. the GitHub trending page.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Where the listing comes from; used in observations.
    fn location(&self) -> &str;

    /// Candidates in listing order, deduplicated and capped at the source's
    /// limit. An empty result means the listing had no recognizable entries.
    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, AdapterError>;
}

/// Document and metadata lookups for a single repository. `Ok(None)` means
/// the resource does not exist.
#[async_trait]
pub trait RepositoryService: Send + Sync {
    async fn fetch_document(&self, owner: &str, repo: &str) -> Result<Option<ReadmeDocument>, AdapterError>;

    async fn fetch_metadata(&self, owner: &str, repo: &str) -> Result<Option<RepoMetadata>, AdapterError>;
}

#[async_trait]
pub trait ArticleGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArticle, GenerationError>;
}

#[async_trait]
pub trait BlogPublisher: Send + Sync {
    async fn publish(&self, payload: &PublishPayload) -> Result<PublishAck, PublishError>;
}
