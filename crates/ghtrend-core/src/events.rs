//! Observation sink handed to every stage and to the retry executor.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    RetryScheduled {
        operation: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    RateLimited {
        url: String,
        cooldown: Duration,
    },
    ListingEmpty {
        url: String,
    },
    ResourceMissing {
        url: String,
    },
    CandidateDropped {
        full_name: String,
        reason: String,
    },
    DocumentUndecodable {
        full_name: String,
        error: String,
    },
    ArticleSkipped {
        full_name: String,
        content_version: String,
    },
    ArticleStored {
        id: i64,
        full_name: String,
    },
    GenerationFailed {
        full_name: String,
        error: String,
    },
    PublishSucceeded {
        id: i64,
        full_name: String,
    },
    PublishFailed {
        id: i64,
        full_name: String,
        error: String,
    },
    StageCompleted {
        stage: &'static str,
        processed: usize,
        succeeded: usize,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RetryScheduled {
                operation,
                attempt,
                max_attempts,
                delay,
                error,
            } => warn!(
                operation = %operation,
                attempt,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "attempt failed, retrying"
            ),
            PipelineEvent::RateLimited { url, cooldown } => warn!(
                url = %url,
                cooldown_secs = cooldown.as_secs(),
                "rate limited or forbidden, cooling down"
            ),
            PipelineEvent::ListingEmpty { url } => warn!(
                url = %url,
                "no repositories found in listing; upstream markup may have changed"
            ),
            PipelineEvent::ResourceMissing { url } => warn!(url = %url, "resource not found"),
            PipelineEvent::CandidateDropped { full_name, reason } => {
                warn!(full_name = %full_name, reason = %reason, "dropping candidate")
            }
            PipelineEvent::DocumentUndecodable { full_name, error } => {
                error!(full_name = %full_name, error = %error, "readme content could not be decoded, dropping candidate")
            }
            PipelineEvent::ArticleSkipped {
                full_name,
                content_version,
            } => info!(full_name = %full_name, content_version = %content_version, "skipping, article already exists"),
            PipelineEvent::ArticleStored { id, full_name } => {
                info!(id, full_name = %full_name, "saved article")
            }
            PipelineEvent::GenerationFailed { full_name, error } => {
                error!(full_name = %full_name, error = %error, "article generation failed")
            }
            PipelineEvent::PublishSucceeded { id, full_name } => {
                info!(id, full_name = %full_name, "published article")
            }
            PipelineEvent::PublishFailed {
                id,
                full_name,
                error,
            } => error!(id, full_name = %full_name, error = %error, "failed to publish article"),
            PipelineEvent::StageCompleted {
                stage,
                processed,
                succeeded,
            } => info!(stage = *stage, processed, succeeded, "stage completed"),
        }
    }
}

/// Keeps every event in memory; used by tests to assert on observations.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::RetryScheduled { delay, .. } => Some(delay),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
