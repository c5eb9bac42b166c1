//! Pipeline orchestration: discover -> enrich -> generate -> publish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ghtrend_adapters::{
    AnthropicConfig, AnthropicGenerator, GitHubApi, GitHubTrendingSource, HttpBlogPublisher,
    TrendingQuery,
};
use ghtrend_core::{Candidate, EnrichedRecord, EventSink, PublishSelection};
use ghtrend_storage::{ArticleStore, HttpClientConfig, StatusCounts};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod enrichment;
pub mod generation;
pub mod publication;

pub use artifacts::{CANDIDATES_FILE, ENRICHED_FILE, RESULTS_FILE};
pub use config::{ConfigError, PipelineConfig};
pub use discovery::DiscoveryStage;
pub use enrichment::EnrichmentStage;
pub use generation::{GenerationOptions, GenerationStage, GenerationSummary};
pub use publication::{PublicationOptions, PublicationStage, PublicationSummary};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectSummary {
    pub candidates: usize,
    pub enriched: usize,
    pub generation: GenerationSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub collect: CollectSummary,
    pub publication: PublicationSummary,
}

/// Runs `fut` inside a span carrying a fresh `run_id`.
pub async fn traced<F: Future>(command: &'static str, fut: F) -> F::Output {
    let run_id = Uuid::new_v4();
    fut.instrument(info_span!("run", %run_id, command)).await
}

pub struct Pipeline {
    config: PipelineConfig,
    store: ArticleStore,
    sink: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        let store = ArticleStore::new(config.database_path.clone());
        Self { config, store, sink }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    fn http_config(&self, timeout_secs: u64) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(timeout_secs),
            user_agent: Some(self.config.user_agent.clone()),
            retry: self.config.retry_policy(),
            rate_limit: self.config.rate_limit_policy(),
            ..Default::default()
        }
    }

    pub async fn init_db(&self) -> Result<()> {
        self.store
            .init_schema()
            .await
            .with_context(|| format!("initializing {}", self.store.path().display()))
    }

    pub async fn status(&self) -> Result<StatusCounts> {
        self.init_db().await?;
        self.store
            .count_by_status()
            .await
            .context("counting articles by status")
    }

    pub async fn discover(&self) -> Result<Vec<Candidate>> {
        let source = GitHubTrendingSource::new(
            self.config.trending_url.clone(),
            TrendingQuery {
                since: self.config.trending_since.clone(),
                language: self.config.trending_language.clone(),
            },
            self.config.discovery_limit,
            self.http_config(self.config.discovery_timeout_secs),
            self.sink.clone(),
        )?;

        let candidates = DiscoveryStage::new(Arc::new(source), self.sink.clone())
            .run()
            .await?;
        artifacts::write_json(&self.config.artifact_path(CANDIDATES_FILE), &candidates).await?;
        info!(count = candidates.len(), "discovery finished");
        Ok(candidates)
    }

    pub async fn enrich(&self) -> Result<Vec<EnrichedRecord>> {
        let candidates: Vec<Candidate> =
            artifacts::read_json(&self.config.artifact_path(CANDIDATES_FILE)).await?;

        let mut http = self.http_config(self.config.enrichment_timeout_secs);
        http.bearer_token = self.config.github_token.clone();
        let api = GitHubApi::new(self.config.github_api_base.clone(), http, self.sink.clone())?;

        let stage = EnrichmentStage::new(Arc::new(api), self.config.max_concurrent_requests, self.sink.clone());
        let records = stage.run(candidates).await;
        artifacts::write_json(&self.config.artifact_path(ENRICHED_FILE), &records).await?;
        info!(count = records.len(), "enrichment finished");
        Ok(records)
    }

    pub async fn generate(&self) -> Result<GenerationSummary> {
        let api_key = self.config.require_generation_credentials()?.to_string();
        self.config.validate()?;
        let records: Vec<EnrichedRecord> =
            artifacts::read_json(&self.config.artifact_path(ENRICHED_FILE)).await?;
        self.init_db().await?;

        let generator = AnthropicGenerator::new(AnthropicConfig {
            api_base: self.config.anthropic_api_base.clone(),
            api_key,
            model: self.config.generation_model_id.clone(),
            max_tokens: self.config.generation_max_tokens,
            timeout: Duration::from_secs(self.config.generation_timeout_secs),
        })?;
        let stage = GenerationStage::new(
            self.store.clone(),
            Arc::new(generator),
            GenerationOptions::from_config(&self.config),
            self.sink.clone(),
        );

        let summary = stage.run(&records).await;
        artifacts::write_json(&self.config.artifact_path(RESULTS_FILE), &summary.results).await?;
        info!(
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed,
            "generation finished"
        );
        Ok(summary)
    }

    pub async fn publish(&self, selection: PublishSelection) -> Result<PublicationSummary> {
        let (url, key) = self.config.require_publish_credentials()?;
        let publisher = HttpBlogPublisher::new(
            url,
            key,
            Duration::from_secs(self.config.publish_timeout_secs),
        )?;
        self.init_db().await?;

        let stage = PublicationStage::new(
            self.store.clone(),
            Arc::new(publisher),
            PublicationOptions::from_config(&self.config),
            self.sink.clone(),
        );
        let summary = stage.run(selection).await?;

        let remaining = self.store.count_by_status().await?.pending;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            remaining,
            "publication finished"
        );
        Ok(summary)
    }

    /// Discover, enrich and generate. Fails before any work when the
    /// generation credential is missing.
    pub async fn collect(&self) -> Result<CollectSummary> {
        self.config.require_generation_credentials()?;
        self.config.validate()?;
        let candidates = self.discover().await?;
        let enriched = self.enrich().await?;
        let generation = self.generate().await?;
        Ok(CollectSummary {
            candidates: candidates.len(),
            enriched: enriched.len(),
            generation,
        })
    }

    pub async fn run_all(&self, selection: PublishSelection) -> Result<RunSummary> {
        self.config.require_generation_credentials()?;
        self.config.require_publish_credentials()?;
        self.config.validate()?;
        let collect = self.collect().await?;
        let publication = self.publish(selection).await?;
        Ok(RunSummary {
            collect,
            publication,
        })
    }
}

/// Builds the collect + publish cron jobs, or `None` when scheduling is
/// disabled in config.
pub async fn maybe_build_scheduler(pipeline: Arc<Pipeline>) -> Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let collect_cron = pipeline.config.collect_cron.clone();
    let collect_pipeline = pipeline.clone();
    let collect = Job::new_async(collect_cron.as_str(), move |_uuid, _l| {
        let pipeline = collect_pipeline.clone();
        Box::pin(async move {
            match traced("scheduled-collect", pipeline.collect()).await {
                Ok(summary) => info!(
                    candidates = summary.candidates,
                    generated = summary.generation.generated,
                    "scheduled collection finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled collection failed"),
            }
        })
    })
    .with_context(|| format!("creating collect job for cron {collect_cron}"))?;
    sched.add(collect).await.context("adding collect job")?;

    let publish_cron = pipeline.config.publish_cron.clone();
    let publish_pipeline = pipeline.clone();
    let publish = Job::new_async(publish_cron.as_str(), move |_uuid, _l| {
        let pipeline = publish_pipeline.clone();
        Box::pin(async move {
            match traced("scheduled-publish", pipeline.publish(PublishSelection::Default)).await {
                Ok(summary) => info!(succeeded = summary.succeeded, "scheduled publication finished"),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled publication failed"),
            }
        })
    })
    .with_context(|| format!("creating publish job for cron {publish_cron}"))?;
    sched.add(publish).await.context("adding publish job")?;

    Ok(Some(sched))
}

/// Runs the scheduler until Ctrl-C.
pub async fn run_scheduler(pipeline: Arc<Pipeline>) -> Result<()> {
    let Some(mut sched) = maybe_build_scheduler(pipeline).await? else {
        anyhow::bail!("scheduler is disabled; set scheduler_enabled or GHTREND_SCHEDULER_ENABLED=true");
    };
    sched.start().await.context("starting scheduler")?;
    info!("scheduler running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
