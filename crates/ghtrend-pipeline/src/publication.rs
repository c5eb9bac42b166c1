//! Pushes pending articles to the blog endpoint, oldest first.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use ghtrend_adapters::{BlogPublisher, PublishError, PublishPayload};
use ghtrend_core::{ArticleRecord, EventSink, PipelineEvent, PublishSelection, StatusUpdate};
use ghtrend_storage::{ArticleStore, RetryExecutor, RetryPolicy};
use serde::Serialize;

use crate::config::PipelineConfig;

#[derive(Debug, Clone)]
pub struct PublicationOptions {
    pub retry: RetryPolicy,
    pub delay: Duration,
    pub header_image_url: Option<String>,
}

impl PublicationOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            delay: config.publish_delay(),
            header_image_url: config.header_image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublicationSummary {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct PublicationStage {
    store: ArticleStore,
    publisher: Arc<dyn BlogPublisher>,
    retry: RetryExecutor,
    options: PublicationOptions,
    sink: Arc<dyn EventSink>,
}

impl PublicationStage {
    pub fn new(
        store: ArticleStore,
        publisher: Arc<dyn BlogPublisher>,
        options: PublicationOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            publisher,
            retry: RetryExecutor::new(options.retry, sink.clone()),
            options,
            sink,
        }
    }

    /// Publishes the selected pending articles one at a time. Every selected
    /// article ends up `success` or `failed`.
    pub async fn run(&self, selection: PublishSelection) -> Result<PublicationSummary> {
        let records = self
            .store
            .pending(selection.limit())
            .await
            .context("selecting pending articles")?;

        let mut summary = PublicationSummary {
            selected: records.len(),
            ..Default::default()
        };

        for (index, record) in records.iter().enumerate() {
            if index > 0 && !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }
            if self.publish_one(record).await {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        self.sink.emit(&PipelineEvent::StageCompleted {
            stage: "publication",
            processed: summary.selected,
            succeeded: summary.succeeded,
        });
        Ok(summary)
    }

    async fn publish_one(&self, record: &ArticleRecord) -> bool {
        let full_name = record.full_name();
        let payload = PublishPayload::for_article(record, Utc::now(), self.options.header_image_url.as_deref());

        let publisher = self.publisher.as_ref();
        let payload = &payload;
        let outcome = self
            .retry
            .run(&full_name, PublishError::disposition, move || publisher.publish(payload))
            .await;

        let update = match &outcome {
            Ok(_) => StatusUpdate::Success,
            Err(err) => StatusUpdate::Failed(err.to_string()),
        };

        if let Err(err) = self.store.update_status(record.id, &update).await {
            self.sink.emit(&PipelineEvent::PublishFailed {
                id: record.id,
                full_name,
                error: format!("recording publish outcome failed: {err}"),
            });
            return false;
        }

        match update {
            StatusUpdate::Success => {
                self.sink.emit(&PipelineEvent::PublishSucceeded {
                    id: record.id,
                    full_name,
                });
                true
            }
            StatusUpdate::Failed(error) => {
                self.sink.emit(&PipelineEvent::PublishFailed {
                    id: record.id,
                    full_name,
                    error,
                });
                false
            }
        }
    }
}
