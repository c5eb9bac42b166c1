//! Trending listing fetch + HTML parsing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ghtrend_core::{Candidate, EventSink};
use ghtrend_storage::{HttpClientConfig, HttpFetcher};
use scraper::{Html, Selector};
use tracing::debug;

use crate::{AdapterError, ListingSource};

const PRIMARY_SELECTOR: &str = "article.Box-row h2 a";
const FALLBACK_SELECTOR: &str = "h2.h3 a";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

fn select_hrefs(document: &Html, selector: &str) -> Result<Vec<String>, AdapterError> {
    let sel = Selector::parse(selector).map_err(|e| AdapterError::Parse(e.to_string()))?;
    Ok(document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .collect())
}

fn candidate_from_href(href: &str) -> Option<Candidate> {
    let path = href.strip_prefix('/')?;
    let mut parts = path.split('/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    Candidate::new(owner, repo)
}

/// Extracts up to `limit` `(owner, repo)` pairs from a trending page.
///
/// Falls back to the older `h2.h3 a` markup when the primary selector finds
/// nothing. Links that are not site-relative are ignored and repeated
/// repositories keep their first position.
pub fn parse_trending_listing(html: &str, limit: usize) -> Result<Vec<Candidate>, AdapterError> {
    let document = Html::parse_document(html);
    let mut hrefs = select_hrefs(&document, PRIMARY_SELECTOR)?;
    if hrefs.is_empty() {
        hrefs = select_hrefs(&document, FALLBACK_SELECTOR)?;
    }
    debug!(links = hrefs.len(), "trending links found");

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for href in hrefs {
        if out.len() >= limit {
            break;
        }
        let Some(candidate) = candidate_from_href(&href) else {
            continue;
        };
        if seen.insert(candidate.full_name.clone()) {
            out.push(candidate);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingQuery {
    /// `daily`, `weekly` or `monthly`.
    pub since: String,
    pub language: Option<String>,
}

impl Default for TrendingQuery {
    fn default() -> Self {
        Self {
            since: "weekly".to_string(),
            language: None,
        }
    }
}

impl TrendingQuery {
    fn params(&self) -> Vec<(&str, &str)> {
        let mut params = vec![("since", self.since.as_str())];
        if let Some(language) = self.language.as_deref().filter(|l| !l.is_empty()) {
            params.push(("language", language));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct GitHubTrendingSource {
    http: HttpFetcher,
    url: String,
    query: TrendingQuery,
    limit: usize,
}

impl GitHubTrendingSource {
    /// The listing is served as HTML to browsers only, so the client always
    /// sends a browser-like `User-Agent` and `Accept`.
    pub fn new(
        url: impl Into<String>,
        query: TrendingQuery,
        limit: usize,
        mut config: HttpClientConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, AdapterError> {
        config.user_agent = Some(BROWSER_USER_AGENT.to_string());
        config
            .default_headers
            .push(("Accept".to_string(), BROWSER_ACCEPT.to_string()));
        Ok(Self {
            http: HttpFetcher::new(config, sink)?,
            url: url.into(),
            query,
            limit,
        })
    }
}

#[async_trait]
impl ListingSource for GitHubTrendingSource {
    fn location(&self) -> &str {
        &self.url
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, AdapterError> {
        let html = self.http.get_text(&self.url, &self.query.params()).await?;
        parse_trending_listing(&html, self.limit)
    }
}
