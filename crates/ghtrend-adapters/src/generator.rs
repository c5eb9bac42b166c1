//! Prompt construction and the Anthropic Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use ghtrend_core::EnrichedRecord;
use ghtrend_storage::RetryDisposition;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{AdapterError, ArticleGenerator};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const SYSTEM_INSTRUCTION: &str = "\
You are a technology writer who understands both the engineering and the \
real-world use of software. Using a GitHub README, write an explanatory article \
that specialists and non-specialists can both follow.

Tone:
- Neutral, thoughtful and practical while staying approachable.
- Prefer plain analogies and step-by-step explanations over strings of jargon.
- Show the value of the technology to readers outside engineering, such as \
healthcare or education.
- No promotional or vague language.

Output format:
- Markdown, roughly 1800 to 2500 words.
- Use only H2 (##) and H3 (###) headings. Never use H1.
- Start the article with an H2 heading; do not add a title line.
- Use code blocks and tables where they help.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArticle {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Builds the service request. `document` must already be sanitized and
/// truncated.
pub fn build_generation_request(record: &EnrichedRecord, document: &str) -> GenerationRequest {
    let owner = &record.owner;
    let repo = &record.repo;
    let user = format!(
        "Summarize and analyze the README below and write an article that readers \
outside engineering, for example in healthcare or education, can follow.

Repository:
- Name: {owner}/{repo}
- Stars: {stars}
- License: {license}
- Last push: {last_push}
- URL: https://github.com/{owner}/{repo}

README:
```markdown
{document}
```

Requirements:
1. Open with 200-300 words, free of jargon, on what the tool is, what is new about it and what it makes possible.
2. Give a short project overview including the license.
3. Describe 3-4 concrete points of novelty.
4. Lay out the stack or processing flow as a table or list, and explain usage examples from the README or propose realistic ones.
5. Give at least three application areas such as healthcare, education or public services.
6. Discuss future development and impact.
7. End with a Markdown link to the GitHub repository.

Structure:
## 1. Introduction
## 2. Project Overview
## 3. What Is New
## 4. Architecture and Use Cases
## 5. Applications
## 6. Outlook
## 7. Summary and GitHub Link

Do not copy the README verbatim. Do not use H1 headings.
",
        stars = record.star_count,
        license = record.license_name,
        last_push = record.last_push_or_unknown(),
    );
    GenerationRequest {
        system: SYSTEM_INSTRUCTION.to_string(),
        user,
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation service rate limited: {0}")]
    RateLimited(String),
    #[error("generation request timed out: {0}")]
    Timeout(String),
    #[error("generation failed: {0}")]
    Other(String),
}

impl GenerationError {
    /// Only rate limits and timeouts are worth another attempt.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            GenerationError::RateLimited(_) | GenerationError::Timeout(_) => RetryDisposition::Retryable,
            GenerationError::Other(_) => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct AnthropicGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicGenerator {
    pub fn new(config: AnthropicConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.api_base.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
            max_tokens: config.max_tokens,
        })
    }
}

fn classify_transport(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(err.to_string())
    } else {
        GenerationError::Other(err.to_string())
    }
}

#[async_trait]
impl ArticleGenerator for AnthropicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArticle, GenerationError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &request.system,
            messages: [Message {
                role: "user",
                content: &request.user,
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = format!("{status}: {text}");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                GenerationError::RateLimited(detail)
            } else {
                GenerationError::Other(detail)
            });
        }

        let parsed: MessagesResponse = resp.json().await.map_err(classify_transport)?;
        let text = parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| GenerationError::Other("response contained no text block".to_string()))?;

        info!(
            chars = text.chars().count(),
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "article generated"
        );
        Ok(GeneratedArticle {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}
