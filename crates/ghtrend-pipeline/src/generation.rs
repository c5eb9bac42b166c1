//! Sequential article generation with history-based deduplication.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ghtrend_adapters::{build_generation_request, ArticleGenerator, GenerationError};
use ghtrend_core::text::{append_footer, period_key, sanitize_content, truncate_text};
use ghtrend_core::{EnrichedRecord, EventSink, NewArticle, PipelineEvent, ResultEntry, ResultStatus};
use ghtrend_storage::{ArticleStore, InsertOutcome, RetryExecutor, RetryPolicy};
use serde::Serialize;

use crate::config::PipelineConfig;

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub retry: RetryPolicy,
    pub max_document_length: usize,
    pub period_format: String,
    /// Pause between two generation-service calls.
    pub delay: Duration,
}

impl GenerationOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            max_document_length: config.max_document_length,
            period_format: config.period_label_format.clone(),
            delay: config.generation_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    pub processed: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<ResultEntry>,
}

impl GenerationSummary {
    fn record(&mut self, record: &EnrichedRecord, status: ResultStatus) {
        self.results.push(ResultEntry {
            owner: record.owner.clone(),
            repo: record.repo.clone(),
            status,
        });
    }
}

enum Outcome {
    Stored,
    Skipped,
    Failed,
}

pub struct GenerationStage {
    store: ArticleStore,
    generator: Arc<dyn ArticleGenerator>,
    retry: RetryExecutor,
    options: GenerationOptions,
    sink: Arc<dyn EventSink>,
}

impl GenerationStage {
    pub fn new(
        store: ArticleStore,
        generator: Arc<dyn ArticleGenerator>,
        options: GenerationOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            generator,
            retry: RetryExecutor::new(options.retry, sink.clone()),
            options,
            sink,
        }
    }

    /// Processes records one at a time. Records whose identity key is already
    /// stored are skipped without calling the generator.
    pub async fn run(&self, records: &[EnrichedRecord]) -> GenerationSummary {
        let period = period_key(&Utc::now(), &self.options.period_format);
        let mut summary = GenerationSummary::default();
        let mut generator_called = false;

        for record in records {
            summary.processed += 1;
            let outcome = self.process(record, &period, &mut generator_called).await;
            match outcome {
                Outcome::Stored => {
                    summary.generated += 1;
                    summary.record(record, ResultStatus::Success);
                }
                Outcome::Skipped => {
                    summary.skipped += 1;
                    summary.record(record, ResultStatus::SkippedOrFailed);
                }
                Outcome::Failed => {
                    summary.failed += 1;
                    summary.record(record, ResultStatus::SkippedOrFailed);
                }
            }
        }

        self.sink.emit(&PipelineEvent::StageCompleted {
            stage: "generation",
            processed: summary.processed,
            succeeded: summary.generated,
        });
        summary
    }

    async fn process(&self, record: &EnrichedRecord, period: &str, generator_called: &mut bool) -> Outcome {
        let document = truncate_text(
            &sanitize_content(&record.document_text),
            self.options.max_document_length,
        );
        let request = build_generation_request(record, &document);

        match self
            .store
            .exists(&record.owner, &record.repo, &record.content_version)
            .await
        {
            Ok(true) => {
                self.emit_skip(record);
                return Outcome::Skipped;
            }
            Ok(false) => {}
            Err(err) => return self.fail(record, format!("history lookup failed: {err}")),
        }

        if *generator_called && !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }
        *generator_called = true;

        let generator = self.generator.as_ref();
        let request = &request;
        let article = match self
            .retry
            .run(&record.full_name, GenerationError::disposition, move || {
                generator.generate(request)
            })
            .await
        {
            Ok(article) => article,
            Err(err) => return self.fail(record, err.to_string()),
        };

        let body = append_footer(&article.text, &record.owner, &record.repo, &record.license_name);
        let new_article = NewArticle::from_enriched(record, period.to_string(), body);

        match self.store.insert(&new_article).await {
            Ok(InsertOutcome::Inserted(id)) => {
                self.sink.emit(&PipelineEvent::ArticleStored {
                    id,
                    full_name: record.full_name.clone(),
                });
                Outcome::Stored
            }
            Ok(InsertOutcome::Duplicate) => {
                self.emit_skip(record);
                Outcome::Skipped
            }
            Err(err) => self.fail(record, format!("saving article failed: {err}")),
        }
    }

    fn emit_skip(&self, record: &EnrichedRecord) {
        self.sink.emit(&PipelineEvent::ArticleSkipped {
            full_name: record.full_name.clone(),
            content_version: record.content_version.clone(),
        });
    }

    fn fail(&self, record: &EnrichedRecord, error: String) -> Outcome {
        self.sink.emit(&PipelineEvent::GenerationFailed {
            full_name: record.full_name.clone(),
            error,
        });
        Outcome::Failed
    }
}
