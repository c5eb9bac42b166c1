//! Stateless text transforms applied before and after generation.

use std::fmt::Write;
use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use regex::Regex;

pub const REDACTION_MARKER: &str = "[REDACTED]";
pub const TRUNCATION_MARKER: &str = "\n\n... (truncated)";

const SENSITIVE_PATTERNS: [&str; 4] = [
    r"(?i)sk-[a-z0-9]{32,}",
    r"(?i)ghp_[a-z0-9]{36,}",
    r"(?i)password\s*[:=]\s*\S+",
    r"(?i)bearer\s+[a-z0-9_\-.]+",
];

fn sensitive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENSITIVE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Replaces credential-looking substrings with [`REDACTION_MARKER`].
pub fn sanitize_content(content: &str) -> String {
    let mut out = content.to_string();
    for pattern in sensitive_patterns() {
        out = pattern.replace_all(&out, REDACTION_MARKER).into_owned();
    }
    out
}

/// Keeps the first `max_chars` characters and appends [`TRUNCATION_MARKER`]
/// when anything was cut. Counts chars, not bytes.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
    }
}

pub const DEFAULT_PERIOD_FORMAT: &str = "%G-W%V";

/// True when every specifier in `format` is one chrono understands.
pub fn is_valid_period_format(format: &str) -> bool {
    StrftimeItems::new(format).all(|item| !matches!(item, Item::Error))
}

/// Batch label for a generated article, e.g. `2025-W41` for `%G-W%V`.
/// A format chrono cannot render falls back to [`DEFAULT_PERIOD_FORMAT`].
pub fn period_key<Tz: TimeZone>(now: &DateTime<Tz>, format: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    if write!(out, "{}", now.format(format)).is_ok() {
        return out;
    }
    out.clear();
    let _ = write!(out, "{}", now.format(DEFAULT_PERIOD_FORMAT));
    out
}

/// Attribution appended to every generated article.
pub fn attribution_footer(owner: &str, repo: &str, license: &str) -> String {
    format!(
        "\n\n---\n\n**Source**: [GitHub - {owner}/{repo}](https://github.com/{owner}/{repo})\n\
         This article is an automatically generated summary based on public information.\n\
         License: {license} (as stated by the repository)\n"
    )
}

pub fn append_footer(article: &str, owner: &str, repo: &str, license: &str) -> String {
    let mut out = article.to_string();
    out.push_str(&attribution_footer(owner, repo, license));
    out
}
