//! Pipeline configuration: defaults, then an optional YAML file, then
//! environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ghtrend_core::text::{is_valid_period_format, DEFAULT_PERIOD_FORMAT};
use ghtrend_storage::{RateLimitPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value `{value}` for {var}")]
    InvalidValue { var: &'static str, value: String },
    #[error("{0} is not set")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,

    pub max_concurrent_requests: usize,
    pub discovery_timeout_secs: u64,
    pub enrichment_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub publish_timeout_secs: u64,

    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub rate_limit_cooldown_secs: u64,
    pub rate_limit_max_waits: Option<u32>,

    pub generation_model_id: String,
    pub generation_max_tokens: u32,
    pub max_document_length: usize,
    pub period_label_format: String,
    pub generation_delay_ms: u64,
    pub publish_delay_ms: u64,

    pub trending_url: String,
    pub trending_since: String,
    pub trending_language: Option<String>,
    pub discovery_limit: usize,

    pub github_api_base: String,
    pub github_token: Option<String>,
    pub anthropic_api_base: String,
    pub anthropic_api_key: Option<String>,
    pub blog_api_url: Option<String>,
    pub blog_api_key: Option<String>,
    pub header_image_url: Option<String>,
    pub user_agent: String,

    pub scheduler_enabled: bool,
    /// Six-field cron (seconds first) for discover, enrich and generate.
    pub collect_cron: String,
    pub publish_cron: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_path: PathBuf::from("./db/articles.db"),
            max_concurrent_requests: 5,
            discovery_timeout_secs: 10,
            enrichment_timeout_secs: 10,
            generation_timeout_secs: 120,
            publish_timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            rate_limit_cooldown_secs: 60,
            rate_limit_max_waits: None,
            generation_model_id: "claude-sonnet-4-5-20250929".to_string(),
            generation_max_tokens: 4096,
            max_document_length: 8_000,
            period_label_format: DEFAULT_PERIOD_FORMAT.to_string(),
            generation_delay_ms: 2_000,
            publish_delay_ms: 2_000,
            trending_url: "https://github.com/trending".to_string(),
            trending_since: "weekly".to_string(),
            trending_language: None,
            discovery_limit: 18,
            github_api_base: "https://api.github.com".to_string(),
            github_token: None,
            anthropic_api_base: "https://api.anthropic.com".to_string(),
            anthropic_api_key: None,
            blog_api_url: None,
            blog_api_key: None,
            header_image_url: None,
            user_agent: "GitHub-Trend-Auto-Blog/1.0".to_string(),
            scheduler_enabled: false,
            collect_cron: "0 0 6 * * Mon".to_string(),
            publish_cron: "0 0 9,18 * * *".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "True" | "yes" => Ok(true),
        "0" | "false" | "FALSE" | "False" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl PipelineConfig {
    /// Defaults, overlaid by `path` when given, overlaid by process env.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail once a stage is running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_period_format(&self.period_label_format) {
            return Err(ConfigError::InvalidValue {
                var: "period_label_format",
                value: self.period_label_format.clone(),
            });
        }
        Ok(())
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = parse_var("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("INITIAL_BACKOFF_MS") {
            self.initial_backoff_ms = parse_var("INITIAL_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("BACKOFF_MULTIPLIER") {
            self.backoff_multiplier = parse_var("BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_COOLDOWN_SECS") {
            self.rate_limit_cooldown_secs = parse_var("RATE_LIMIT_COOLDOWN_SECS", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX_WAITS") {
            self.rate_limit_max_waits = non_empty(v)
                .map(|v| parse_var("RATE_LIMIT_MAX_WAITS", &v))
                .transpose()?;
        }
        if let Some(v) = lookup("GENERATION_MODEL") {
            self.generation_model_id = v;
        }
        if let Some(v) = lookup("MAX_DOCUMENT_LENGTH") {
            self.max_document_length = parse_var("MAX_DOCUMENT_LENGTH", &v)?;
        }
        if let Some(v) = lookup("TRENDING_SINCE") {
            self.trending_since = v;
        }
        if let Some(v) = lookup("TRENDING_LANGUAGE") {
            self.trending_language = non_empty(v);
        }
        if let Some(v) = lookup("DISCOVERY_LIMIT") {
            self.discovery_limit = parse_var("DISCOVERY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("GITHUB_TOKEN_PAT") {
            self.github_token = non_empty(v);
        }
        if let Some(v) = lookup("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = non_empty(v);
        }
        if let Some(v) = lookup("BLOG_API_URL") {
            self.blog_api_url = non_empty(v);
        }
        if let Some(v) = lookup("BLOG_API_KEY") {
            self.blog_api_key = non_empty(v);
        }
        if let Some(v) = lookup("HEADER_IMAGE_URL") {
            self.header_image_url = non_empty(v);
        }
        if let Some(v) = lookup("GHTREND_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("GHTREND_SCHEDULER_ENABLED") {
            self.scheduler_enabled = parse_bool("GHTREND_SCHEDULER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("COLLECT_CRON") {
            self.collect_cron = v;
        }
        if let Some(v) = lookup("PUBLISH_CRON") {
            self.publish_cron = v;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            cooldown: Duration::from_secs(self.rate_limit_cooldown_secs),
            max_waits: self.rate_limit_max_waits,
        }
    }

    pub fn generation_delay(&self) -> Duration {
        Duration::from_millis(self.generation_delay_ms)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn require_generation_credentials(&self) -> Result<&str, ConfigError> {
        self.anthropic_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("ANTHROPIC_API_KEY"))
    }

    /// Returns `(url, api_key)`.
    pub fn require_publish_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let url = self
            .blog_api_url
            .as_deref()
            .ok_or(ConfigError::MissingCredential("BLOG_API_URL"))?;
        let key = self
            .blog_api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("BLOG_API_KEY"))?;
        Ok((url, key))
    }
}
