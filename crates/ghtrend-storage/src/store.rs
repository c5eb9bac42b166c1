//! SQLite-backed article store.
//!
//! Every operation opens its own connection and closes it before returning,
//! so stages never hold a handle across an await on the network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ghtrend_core::{ArticleRecord, ArticleStatus, NewArticle, StatusUpdate};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row};
use thiserror::Error;
use tracing::debug;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        week_key       TEXT    NOT NULL,
        owner          TEXT    NOT NULL,
        repo           TEXT    NOT NULL,
        sha            TEXT    NOT NULL,
        stars          INTEGER NOT NULL DEFAULT 0,
        license        TEXT,
        last_push      TEXT,
        readme_content TEXT,
        markdown       TEXT    NOT NULL,
        status         TEXT    NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending', 'success', 'failed')),
        error_message  TEXT,
        created_at     TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        posted_at      TEXT,
        UNIQUE (owner, repo, sha)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_status ON articles (status)",
    "CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_articles_week_key ON articles (week_key)",
];

const SELECT_COLUMNS: &str = "id, week_key, owner, repo, sha, stars, license, last_push, \
     readme_content, markdown, status, error_message, created_at, posted_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("creating database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid article row: {0}")]
    InvalidRow(String),
    #[error("article {id} not found")]
    NotFound { id: i64 },
    #[error("article {id} is no longer pending")]
    NotPending { id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Another row already holds this `(owner, repo, sha)`.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.success + self.failed
    }
}

#[derive(Debug, Clone)]
pub struct ArticleStore {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl ArticleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        Self { path, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        Ok(self.options.connect().await?)
    }

    /// Creates the database file, its parent directory and the schema. Safe to
    /// call repeatedly.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut conn = self.connect().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        conn.close().await?;
        debug!(path = %self.path.display(), "article schema ready");
        Ok(())
    }

    pub async fn exists(&self, owner: &str, repo: &str, sha: &str) -> Result<bool, StoreError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query("SELECT 1 FROM articles WHERE owner = ? AND repo = ? AND sha = ? LIMIT 1")
            .bind(owner)
            .bind(repo)
            .bind(sha)
            .fetch_optional(&mut conn)
            .await?;
        conn.close().await?;
        Ok(row.is_some())
    }

    /// Inserts a pending article. A uniqueness conflict is reported as
    /// [`InsertOutcome::Duplicate`] rather than an error.
    pub async fn insert(&self, article: &NewArticle) -> Result<InsertOutcome, StoreError> {
        let stars = i64::try_from(article.star_count).unwrap_or(i64::MAX);
        let mut conn = self.connect().await?;
        let result = sqlx::query(
            "INSERT INTO articles \
             (week_key, owner, repo, sha, stars, license, last_push, readme_content, markdown) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&article.period_key)
        .bind(&article.owner)
        .bind(&article.repo)
        .bind(&article.content_version)
        .bind(stars)
        .bind(&article.license_name)
        .bind(&article.last_push_timestamp)
        .bind(&article.source_document_text)
        .bind(&article.generated_body)
        .execute(&mut conn)
        .await;

        let outcome = match result {
            Ok(done) => InsertOutcome::Inserted(done.last_insert_rowid()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => InsertOutcome::Duplicate,
            Err(err) => return Err(err.into()),
        };
        conn.close().await?;
        Ok(outcome)
    }

    /// Pending articles, oldest first. `None` returns all of them.
    pub async fn pending(&self, limit: Option<u32>) -> Result<Vec<ArticleRecord>, StoreError> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let mut conn = self.connect().await?;
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<ArticleRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM articles WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut conn)
            .await?;
        conn.close().await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Moves a pending article to its terminal state. Success stamps
    /// `posted_at` and clears any error; failure records the message and
    /// leaves `posted_at` empty.
    pub async fn update_status(&self, id: i64, update: &StatusUpdate) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        let result = match update {
            StatusUpdate::Success => {
                sqlx::query(
                    "UPDATE articles SET status = 'success', posted_at = ?, error_message = NULL \
                     WHERE id = ? AND status = 'pending'",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut conn)
                .await?
            }
            StatusUpdate::Failed(message) => {
                sqlx::query(
                    "UPDATE articles SET status = 'failed', error_message = ?, posted_at = NULL \
                     WHERE id = ? AND status = 'pending'",
                )
                .bind(message)
                .bind(id)
                .execute(&mut conn)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            let known = sqlx::query("SELECT 1 FROM articles WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut conn)
                .await?
                .is_some();
            conn.close().await?;
            return Err(if known {
                StoreError::NotPending { id }
            } else {
                StoreError::NotFound { id }
            });
        }

        conn.close().await?;
        debug!(id, status = %update.status(), "article status updated");
        Ok(())
    }

    pub async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM articles GROUP BY status")
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let n = u64::try_from(n).unwrap_or_default();
            match parse_status(&status)? {
                ArticleStatus::Pending => counts.pending = n,
                ArticleStatus::Success => counts.success = n,
                ArticleStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}

fn parse_status(raw: &str) -> Result<ArticleStatus, StoreError> {
    raw.parse()
        .map_err(|err: ghtrend_core::UnknownStatus| StoreError::InvalidRow(err.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::InvalidRow(format!("bad timestamp `{raw}`: {err}")))
}

fn row_to_record(row: &SqliteRow) -> Result<ArticleRecord, StoreError> {
    let stars: i64 = row.try_get("stars")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let posted_at: Option<String> = row.try_get("posted_at")?;

    Ok(ArticleRecord {
        id: row.try_get("id")?,
        period_key: row.try_get("week_key")?,
        owner: row.try_get("owner")?,
        repo: row.try_get("repo")?,
        content_version: row.try_get("sha")?,
        star_count: u64::try_from(stars).unwrap_or_default(),
        license_name: row.try_get("license")?,
        last_push_timestamp: row.try_get("last_push")?,
        source_document_text: row.try_get("readme_content")?,
        generated_body: row.try_get("markdown")?,
        status: parse_status(&status)?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp(&created_at)?,
        posted_at: posted_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
