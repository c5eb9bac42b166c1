//! Core domain model for the trending-repository blog pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod events;
pub mod text;

pub use events::{EventSink, PipelineEvent, RecordingSink, TracingSink};

/// Placeholder used when the upstream service does not report a value.
pub const UNKNOWN: &str = "Unknown";

/// Repository identifier produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub owner: String,
    pub repo: String,
    pub full_name: String,
}

impl Candidate {
    /// Returns `None` when either part is blank.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Option<Self> {
        let owner = owner.into().trim().to_string();
        let repo = repo.into().trim().to_string();
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        let full_name = format!("{owner}/{repo}");
        Some(Self {
            owner,
            repo,
            full_name,
        })
    }
}

/// Candidate plus its document and metadata. Field names on the wire follow
/// the enriched-list artifact (`sha`, `readme_content`, `stars`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub owner: String,
    pub repo: String,
    pub full_name: String,
    #[serde(rename = "sha")]
    pub content_version: String,
    #[serde(rename = "readme_content")]
    pub document_text: String,
    #[serde(rename = "stars", default)]
    pub star_count: u64,
    #[serde(rename = "license", default = "unknown_string")]
    pub license_name: String,
    #[serde(rename = "last_push", default)]
    pub last_push_timestamp: Option<String>,
}

fn unknown_string() -> String {
    UNKNOWN.to_string()
}

impl EnrichedRecord {
    pub fn last_push_or_unknown(&self) -> &str {
        self.last_push_timestamp.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn identity_key(&self) -> IdentityKey<'_> {
        IdentityKey {
            owner: &self.owner,
            repo: &self.repo,
            content_version: &self.content_version,
        }
    }
}

/// `(owner, repo, content_version)`: what "already processed" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub content_version: &'a str,
}

impl fmt::Display for IdentityKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.content_version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Pending,
    Success,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Success => "success",
            ArticleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown article status `{}`", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ArticleStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ArticleStatus::Pending),
            "success" => Ok(ArticleStatus::Success),
            "failed" => Ok(ArticleStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// The only transitions publication may request. A `Failed` update always
/// carries its message, so the status/error invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Success,
    Failed(String),
}

impl StatusUpdate {
    pub fn status(&self) -> ArticleStatus {
        match self {
            StatusUpdate::Success => ArticleStatus::Success,
            StatusUpdate::Failed(_) => ArticleStatus::Failed,
        }
    }
}

/// Insert payload for a freshly generated article. The store assigns `id`,
/// `status = pending` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub period_key: String,
    pub owner: String,
    pub repo: String,
    pub content_version: String,
    pub star_count: u64,
    pub license_name: String,
    pub last_push_timestamp: Option<String>,
    pub source_document_text: String,
    pub generated_body: String,
}

impl NewArticle {
    pub fn from_enriched(record: &EnrichedRecord, period_key: String, generated_body: String) -> Self {
        Self {
            period_key,
            owner: record.owner.clone(),
            repo: record.repo.clone(),
            content_version: record.content_version.clone(),
            star_count: record.star_count,
            license_name: record.license_name.clone(),
            last_push_timestamp: record.last_push_timestamp.clone(),
            source_document_text: record.document_text.clone(),
            generated_body,
        }
    }
}

/// Persisted article row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub period_key: String,
    pub owner: String,
    pub repo: String,
    pub content_version: String,
    pub star_count: u64,
    pub license_name: Option<String>,
    pub last_push_timestamp: Option<String>,
    pub source_document_text: Option<String>,
    pub generated_body: String,
    pub status: ArticleStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn identity_key(&self) -> IdentityKey<'_> {
        IdentityKey {
            owner: &self.owner,
            repo: &self.repo,
            content_version: &self.content_version,
        }
    }

    /// `success <=> posted_at set <=> no error`, `failed <=> error set <=> no posted_at`.
    pub fn status_is_consistent(&self) -> bool {
        match self.status {
            ArticleStatus::Pending => self.posted_at.is_none() && self.error_message.is_none(),
            ArticleStatus::Success => self.posted_at.is_some() && self.error_message.is_none(),
            ArticleStatus::Failed => self.posted_at.is_none() && self.error_message.is_some(),
        }
    }
}

/// How many pending articles a publication run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSelection {
    /// The two oldest pending articles.
    Default,
    Limit(u32),
    Bulk,
}

impl PublishSelection {
    pub const DEFAULT_LIMIT: u32 = 2;

    /// `--bulk` wins over `--limit`.
    pub fn from_flags(limit: Option<u32>, bulk: bool) -> Self {
        match (bulk, limit) {
            (true, _) => PublishSelection::Bulk,
            (false, Some(n)) if n > 0 => PublishSelection::Limit(n),
            _ => PublishSelection::Default,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            PublishSelection::Default => Some(Self::DEFAULT_LIMIT),
            PublishSelection::Limit(n) => Some(*n),
            PublishSelection::Bulk => None,
        }
    }
}

/// Coarse per-repository outcome written to the results artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "skipped or failed")]
    SkippedOrFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub owner: String,
    pub repo: String,
    pub status: ResultStatus,
}
