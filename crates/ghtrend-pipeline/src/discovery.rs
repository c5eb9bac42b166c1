use std::sync::Arc;

use anyhow::{Context, Result};
use ghtrend_adapters::ListingSource;
use ghtrend_core::{Candidate, EventSink, PipelineEvent};

pub struct DiscoveryStage {
    source: Arc<dyn ListingSource>,
    sink: Arc<dyn EventSink>,
}

impl DiscoveryStage {
    pub fn new(source: Arc<dyn ListingSource>, sink: Arc<dyn EventSink>) -> Self {
        Self { source, sink }
    }

    /// An empty listing is reported as a warning and yields an empty list.
    pub async fn run(&self) -> Result<Vec<Candidate>> {
        let candidates = self
            .source
            .fetch_candidates()
            .await
            .with_context(|| format!("fetching listing {}", self.source.location()))?;

        if candidates.is_empty() {
            self.sink.emit(&PipelineEvent::ListingEmpty {
                url: self.source.location().to_string(),
            });
        }
        self.sink.emit(&PipelineEvent::StageCompleted {
            stage: "discovery",
            processed: candidates.len(),
            succeeded: candidates.len(),
        });
        Ok(candidates)
    }
}
