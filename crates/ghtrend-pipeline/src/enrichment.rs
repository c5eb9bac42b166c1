//! Concurrent document + metadata lookups for discovered candidates.

use std::sync::Arc;

use ghtrend_adapters::{AdapterError, RepositoryService};
use ghtrend_core::{Candidate, EnrichedRecord, EventSink, PipelineEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct EnrichmentStage {
    repos: Arc<dyn RepositoryService>,
    max_concurrent: usize,
    sink: Arc<dyn EventSink>,
}

impl EnrichmentStage {
    pub fn new(repos: Arc<dyn RepositoryService>, max_concurrent: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            repos,
            max_concurrent: max_concurrent.max(1),
            sink,
        }
    }

    /// Enriches every candidate, at most `max_concurrent` at a time.
    ///
    /// Output keeps listing order. A candidate missing its document or its
    /// metadata is dropped.
    pub async fn run(&self, candidates: Vec<Candidate>) -> Vec<EnrichedRecord> {
        let processed = candidates.len();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            let permits = permits.clone();
            let repos = self.repos.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, candidate, Err(Dropped::Incomplete("concurrency limiter closed".to_string())));
                };
                let result = enrich_one(repos.as_ref(), &candidate).await;
                (index, candidate, result)
            });
        }

        let mut out = Vec::with_capacity(processed);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(record))) => out.push((index, record)),
                Ok((_, candidate, Err(Dropped::Incomplete(reason)))) => {
                    self.sink.emit(&PipelineEvent::CandidateDropped {
                        full_name: candidate.full_name,
                        reason,
                    })
                }
                Ok((_, candidate, Err(Dropped::Undecodable(error)))) => {
                    self.sink.emit(&PipelineEvent::DocumentUndecodable {
                        full_name: candidate.full_name,
                        error,
                    })
                }
                Err(err) => self.sink.emit(&PipelineEvent::CandidateDropped {
                    full_name: "<unknown>".to_string(),
                    reason: format!("enrichment task failed: {err}"),
                }),
            }
        }

        out.sort_by_key(|(index, _)| *index);
        let out: Vec<EnrichedRecord> = out.into_iter().map(|(_, record)| record).collect();

        self.sink.emit(&PipelineEvent::StageCompleted {
            stage: "enrichment",
            processed,
            succeeded: out.len(),
        });
        out
    }
}

enum Dropped {
    Incomplete(String),
    Undecodable(String),
}

async fn enrich_one(repos: &dyn RepositoryService, candidate: &Candidate) -> Result<EnrichedRecord, Dropped> {
    let (document, metadata) = tokio::join!(
        repos.fetch_document(&candidate.owner, &candidate.repo),
        repos.fetch_metadata(&candidate.owner, &candidate.repo),
    );

    let document = match document {
        Ok(Some(doc)) => doc,
        Ok(None) => return Err(Dropped::Incomplete("readme not found".to_string())),
        Err(AdapterError::Decode(err)) => return Err(Dropped::Undecodable(err)),
        Err(err) => return Err(Dropped::Incomplete(format!("readme fetch failed: {err}"))),
    };
    let metadata = match metadata {
        Ok(Some(meta)) => meta,
        Ok(None) => return Err(Dropped::Incomplete("repository metadata not found".to_string())),
        Err(err) => return Err(Dropped::Incomplete(format!("metadata fetch failed: {err}"))),
    };

    Ok(EnrichedRecord {
        owner: candidate.owner.clone(),
        repo: candidate.repo.clone(),
        full_name: candidate.full_name.clone(),
        content_version: document.sha,
        document_text: document.content,
        star_count: metadata.stars,
        license_name: metadata.license,
        last_push_timestamp: metadata.last_push,
    })
}
