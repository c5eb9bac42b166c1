use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ghtrend_adapters::{
    AdapterError, ArticleGenerator, BlogPublisher, GeneratedArticle, GenerationError, GenerationRequest,
    ListingSource, PublishAck, PublishError, PublishPayload, ReadmeDocument, RepoMetadata, RepositoryService,
};
use ghtrend_core::{
    ArticleStatus, Candidate, EnrichedRecord, NewArticle, PipelineEvent, PublishSelection, RecordingSink,
    ResultStatus, StatusUpdate,
};
use ghtrend_pipeline::{
    DiscoveryStage, EnrichmentStage, GenerationOptions, GenerationStage, PublicationOptions, PublicationStage,
};
use ghtrend_storage::{ArticleStore, InsertOutcome, RetryPolicy};
use tokio::time::Instant;

struct FakeListing(Vec<Candidate>);

#[async_trait]
impl ListingSource for FakeListing {
    fn location(&self) -> &str {
        "fake://trending"
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, AdapterError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct FakeRepos {
    missing_readme: HashSet<String>,
    undecodable: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl RepositoryService for FakeRepos {
    async fn fetch_document(&self, owner: &str, repo: &str) -> Result<Option<ReadmeDocument>, AdapterError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let full_name = format!("{owner}/{repo}");
        if self.missing_readme.contains(&full_name) {
            return Ok(None);
        }
        if self.undecodable.contains(&full_name) {
            return Err(AdapterError::Decode("Invalid padding".into()));
        }
        let sha = if repo == "widget" { "abc123".to_string() } else { format!("sha-{repo}") };
        Ok(Some(ReadmeDocument {
            sha,
            content: format!("# {repo}\n\nexport KEY=sk-{}\n", "a".repeat(40)),
        }))
    }

    async fn fetch_metadata(&self, _owner: &str, _repo: &str) -> Result<Option<RepoMetadata>, AdapterError> {
        Ok(Some(RepoMetadata {
            stars: 42,
            license: "MIT License".into(),
            last_push: Some("2025-10-01T00:00:00Z".into()),
        }))
    }
}

#[derive(Default)]
struct FakeGenerator {
    failures: Mutex<VecDeque<GenerationError>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    called_at: Mutex<Vec<Instant>>,
}

impl FakeGenerator {
    fn failing_with(errors: Vec<GenerationError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ArticleGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedArticle, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_at.lock().unwrap().push(Instant::now());
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(GeneratedArticle {
            text: "## 1. Introduction\n\nA widget.".into(),
            input_tokens: 10,
            output_tokens: 20,
        })
    }
}

struct FakePublisher {
    statuses: Mutex<VecDeque<u16>>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<PublishPayload>>,
    called_at: Mutex<Vec<Instant>>,
}

impl FakePublisher {
    fn answering(statuses: &[u16]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            called_at: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BlogPublisher for FakePublisher {
    async fn publish(&self, payload: &PublishPayload) -> Result<PublishAck, PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_at.lock().unwrap().push(Instant::now());
        self.payloads.lock().unwrap().push(payload.clone());
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(201);
        match status {
            200..=299 => Ok(PublishAck { status }),
            500..=599 => Err(PublishError::Server {
                status,
                body: "upstream unavailable".into(),
            }),
            _ => Err(PublishError::Client {
                status,
                body: "invalid payload".into(),
            }),
        }
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
    }
}

fn generation_options() -> GenerationOptions {
    GenerationOptions {
        retry: fast_retry(),
        max_document_length: 8_000,
        period_format: "%G-W%V".into(),
        delay: Duration::ZERO,
    }
}

fn publication_options() -> PublicationOptions {
    PublicationOptions {
        retry: fast_retry(),
        delay: Duration::ZERO,
        header_image_url: None,
    }
}

async fn store(dir: &tempfile::TempDir) -> ArticleStore {
    let store = ArticleStore::new(dir.path().join("articles.db"));
    store.init_schema().await.unwrap();
    store
}

fn enriched(repo: &str, sha: &str) -> EnrichedRecord {
    EnrichedRecord {
        owner: "acme".into(),
        repo: repo.into(),
        full_name: format!("acme/{repo}"),
        content_version: sha.into(),
        document_text: format!("# {repo}"),
        star_count: 7,
        license_name: "Apache License 2.0".into(),
        last_push_timestamp: None,
    }
}

async fn insert_pending(store: &ArticleStore, repo: &str) -> i64 {
    let article = NewArticle::from_enriched(&enriched(repo, "v1"), "2025-W41".into(), "## body".into());
    match store.insert(&article).await.unwrap() {
        InsertOutcome::Inserted(id) => id,
        InsertOutcome::Duplicate => panic!("unexpected duplicate"),
    }
}

#[tokio::test]
async fn end_to_end_generates_once_and_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());

    let listing = FakeListing(vec![Candidate::new("acme", "widget").unwrap()]);
    let candidates = DiscoveryStage::new(Arc::new(listing), sink.clone()).run().await.unwrap();
    assert_eq!(candidates.len(), 1);

    let records = EnrichmentStage::new(Arc::new(FakeRepos::default()), 5, sink.clone())
        .run(candidates)
        .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_version, "abc123");

    let generator = Arc::new(FakeGenerator::default());
    let generation = GenerationStage::new(store.clone(), generator.clone(), generation_options(), sink.clone());
    let first = generation.run(&records).await;
    let second = generation.run(&records).await;

    assert_eq!((first.generated, first.skipped), (1, 0));
    assert_eq!((second.generated, second.skipped), (0, 1));
    assert_eq!(first.results[0].status, ResultStatus::Success);
    assert_eq!(second.results[0].status, ResultStatus::SkippedOrFailed);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let pending = store.pending(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    let article = &pending[0];
    assert_eq!(article.status, ArticleStatus::Pending);
    assert!(article.generated_body.contains("https://github.com/acme/widget"));
    assert!(article.generated_body.contains("License: MIT License"));

    let publisher = Arc::new(FakePublisher::answering(&[201]));
    let publication = PublicationStage::new(store.clone(), publisher.clone(), publication_options(), sink.clone());
    let summary = publication.run(PublishSelection::Limit(1)).await.unwrap();
    assert_eq!((summary.selected, summary.succeeded, summary.failed), (1, 1, 0));

    let published = store.get(article.id).await.unwrap().unwrap();
    assert_eq!(published.status, ArticleStatus::Success);
    assert!(published.posted_at.is_some());
    assert!(published.error_message.is_none());

    let payloads = publisher.payloads.lock().unwrap();
    assert!(payloads[0].slug.starts_with("github-trend-widget-"));
    assert!(payloads[0].tags.contains(&"MIT".to_string()));
}

#[tokio::test]
async fn generation_redacts_credentials_before_calling_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());

    let records = EnrichmentStage::new(Arc::new(FakeRepos::default()), 5, sink.clone())
        .run(vec![Candidate::new("acme", "widget").unwrap()])
        .await;
    let generator = Arc::new(FakeGenerator::default());
    GenerationStage::new(store.clone(), generator.clone(), generation_options(), sink)
        .run(&records)
        .await;

    let requests = generator.requests.lock().unwrap();
    assert!(requests[0].user.contains("[REDACTED]"));
    assert!(!requests[0].user.contains(&"a".repeat(40)));

    let stored = store.pending(None).await.unwrap();
    assert_eq!(stored[0].source_document_text.as_deref(), Some(records[0].document_text.as_str()));
}

#[tokio::test]
async fn stored_document_is_the_full_fetched_text() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let mut record = enriched("widget", "v1");
    record.document_text = "x".repeat(10_000);

    let generator = Arc::new(FakeGenerator::default());
    GenerationStage::new(store.clone(), generator.clone(), generation_options(), Arc::new(RecordingSink::new()))
        .run(std::slice::from_ref(&record))
        .await;

    assert!(generator.requests.lock().unwrap()[0].user.contains("... (truncated)"));
    let stored = store.pending(None).await.unwrap();
    assert_eq!(stored[0].source_document_text.as_deref(), Some(record.document_text.as_str()));
}

#[tokio::test]
async fn publish_client_error_marks_failed_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());
    let id = insert_pending(&store, "widget").await;

    let publisher = Arc::new(FakePublisher::answering(&[422]));
    let summary = PublicationStage::new(store.clone(), publisher.clone(), publication_options(), sink.clone())
        .run(PublishSelection::Default)
        .await
        .unwrap();

    assert_eq!((summary.succeeded, summary.failed), (0, 1));
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    assert!(sink.retry_delays().is_empty());

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ArticleStatus::Failed);
    assert!(record.posted_at.is_none());
    let message = record.error_message.unwrap();
    assert!(message.contains("422"));
    assert!(message.contains("invalid payload"));
}

#[tokio::test]
async fn publish_server_errors_retry_up_to_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());
    let id = insert_pending(&store, "widget").await;

    let publisher = Arc::new(FakePublisher::answering(&[503, 503, 503]));
    PublicationStage::new(store.clone(), publisher.clone(), publication_options(), sink.clone())
        .run(PublishSelection::Default)
        .await
        .unwrap();

    assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        sink.retry_delays(),
        vec![Duration::from_millis(1), Duration::from_millis(2)]
    );
    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ArticleStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("Server error 503: upstream unavailable"));
}

#[tokio::test]
async fn publish_recovers_after_transient_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());
    let id = insert_pending(&store, "widget").await;

    let publisher = Arc::new(FakePublisher::answering(&[502, 200]));
    let summary = PublicationStage::new(store.clone(), publisher.clone(), publication_options(), sink)
        .run(PublishSelection::Bulk)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.get(id).await.unwrap().unwrap().status, ArticleStatus::Success);
}

#[tokio::test]
async fn default_selection_publishes_two_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(insert_pending(&store, &format!("repo{n}")).await);
    }

    let publisher = Arc::new(FakePublisher::answering(&[]));
    let summary = PublicationStage::new(
        store.clone(),
        publisher,
        publication_options(),
        Arc::new(RecordingSink::new()),
    )
    .run(PublishSelection::Default)
    .await
    .unwrap();
    assert_eq!(summary.selected, 2);

    for (n, id) in ids.iter().enumerate() {
        let status = store.get(*id).await.unwrap().unwrap().status;
        let expected = if n < 2 { ArticleStatus::Success } else { ArticleStatus::Pending };
        assert_eq!(status, expected, "article {n}");
    }
}

#[tokio::test]
async fn generation_retries_rate_limits_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());

    let generator = Arc::new(FakeGenerator::failing_with(vec![
        GenerationError::RateLimited("429".into()),
        GenerationError::Other("invalid request".into()),
    ]));
    let stage = GenerationStage::new(store.clone(), generator.clone(), generation_options(), sink.clone());

    // First record: rate limited once, then the Other error is consumed on
    // its retry and fails it for good.
    let summary = stage.run(&[enriched("widget", "v1"), enriched("gadget", "v1")]).await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert_eq!((summary.generated, summary.failed), (1, 1));
    assert_eq!(summary.results[0].status, ResultStatus::SkippedOrFailed);
    assert_eq!(summary.results[1].status, ResultStatus::Success);
    assert_eq!(sink.retry_delays(), vec![Duration::from_millis(1)]);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, PipelineEvent::GenerationFailed { full_name, .. } if full_name == "acme/widget")));
    assert!(!store.exists("acme", "widget", "v1").await.unwrap());
    assert!(store.exists("acme", "gadget", "v1").await.unwrap());
}

#[tokio::test]
async fn generation_skips_history_without_calling_service() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let id = insert_pending(&store, "widget").await;
    store.update_status(id, &StatusUpdate::Success).await.unwrap();

    let generator = Arc::new(FakeGenerator::default());
    let summary = GenerationStage::new(store.clone(), generator.clone(), generation_options(), Arc::new(RecordingSink::new()))
        .run(&[enriched("widget", "v1")])
        .await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.count_by_status().await.unwrap().total(), 1);
}

#[tokio::test]
async fn enrichment_honours_concurrency_cap_and_drops_incomplete() {
    let sink = Arc::new(RecordingSink::new());
    let repos = Arc::new(FakeRepos {
        missing_readme: HashSet::from(["acme/repo3".to_string()]),
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let candidates: Vec<_> = (0..8)
        .map(|n| Candidate::new("acme", format!("repo{n}")).unwrap())
        .collect();

    let records = EnrichmentStage::new(repos.clone(), 2, sink.clone()).run(candidates).await;

    assert_eq!(records.len(), 7);
    assert!(records.iter().all(|r| r.repo != "repo3"));
    assert_eq!(repos.peak.load(Ordering::SeqCst), 2);
    assert!(sink.events().iter().any(|e| matches!(
        e,
        PipelineEvent::CandidateDropped { full_name, .. } if full_name == "acme/repo3"
    )));
}

#[tokio::test]
async fn empty_listing_is_a_warning_not_an_error() {
    let sink = Arc::new(RecordingSink::new());
    let candidates = DiscoveryStage::new(Arc::new(FakeListing(Vec::new())), sink.clone())
        .run()
        .await
        .unwrap();

    assert!(candidates.is_empty());
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, PipelineEvent::ListingEmpty { url } if url == "fake://trending")));
}

#[tokio::test]
async fn enrichment_reports_undecodable_documents_as_errors() {
    let sink = Arc::new(RecordingSink::new());
    let repos = Arc::new(FakeRepos {
        undecodable: HashSet::from(["acme/garbled".to_string()]),
        ..Default::default()
    });
    let candidates = vec![
        Candidate::new("acme", "widget").unwrap(),
        Candidate::new("acme", "garbled").unwrap(),
    ];

    let records = EnrichmentStage::new(repos, 2, sink.clone()).run(candidates).await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].repo, "widget");
    let events = sink.events();
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::DocumentUndecodable { full_name, error } if full_name == "acme/garbled" && error.contains("padding")
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::CandidateDropped { .. })));
}

#[tokio::test(start_paused = true)]
async fn generation_pauses_only_between_service_calls() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    insert_pending(&store, "gadget").await;

    let generator = Arc::new(FakeGenerator::default());
    let options = GenerationOptions {
        delay: Duration::from_secs(2),
        ..generation_options()
    };
    let started = Instant::now();
    let summary = GenerationStage::new(store.clone(), generator.clone(), options, Arc::new(RecordingSink::new()))
        .run(&[
            enriched("widget", "v1"),
            enriched("sprocket", "v1"),
            enriched("gadget", "v1"),
            enriched("gizmo", "v1"),
        ])
        .await;

    assert_eq!((summary.generated, summary.skipped), (3, 1));
    let offsets: Vec<Duration> = generator
        .called_at
        .lock()
        .unwrap()
        .iter()
        .map(|at| at.duration_since(started))
        .collect();
    assert_eq!(
        offsets,
        vec![Duration::ZERO, Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[tokio::test(start_paused = true)]
async fn publication_pauses_between_articles() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    insert_pending(&store, "widget").await;
    insert_pending(&store, "gadget").await;

    let publisher = Arc::new(FakePublisher::answering(&[201, 201]));
    let options = PublicationOptions {
        delay: Duration::from_secs(2),
        ..publication_options()
    };
    let started = Instant::now();
    let summary = PublicationStage::new(store.clone(), publisher.clone(), options, Arc::new(RecordingSink::new()))
        .run(PublishSelection::Bulk)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    let called_at = publisher.called_at.lock().unwrap();
    assert_eq!(called_at[0].duration_since(started), Duration::ZERO);
    assert_eq!(called_at[1].duration_since(called_at[0]), Duration::from_secs(2));
}

/// Writes the same identity into the store while "generating", the way a
/// second pipeline run racing this one would.
struct RacingGenerator {
    store: ArticleStore,
    rival: NewArticle,
}

#[async_trait]
impl ArticleGenerator for RacingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedArticle, GenerationError> {
        self.store
            .insert(&self.rival)
            .await
            .map_err(|err| GenerationError::Other(err.to_string()))?;
        Ok(GeneratedArticle {
            text: "## Late".into(),
            input_tokens: 1,
            output_tokens: 1,
        })
    }
}

#[tokio::test]
async fn duplicate_insert_after_generation_counts_as_skip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir).await;
    let sink = Arc::new(RecordingSink::new());
    let record = enriched("widget", "v1");
    let generator = Arc::new(RacingGenerator {
        store: store.clone(),
        rival: NewArticle::from_enriched(&record, "2025-W41".into(), "## First".into()),
    });

    let summary = GenerationStage::new(store.clone(), generator, generation_options(), sink.clone())
        .run(std::slice::from_ref(&record))
        .await;

    assert_eq!((summary.generated, summary.skipped, summary.failed), (0, 1, 0));
    assert_eq!(summary.results[0].status, ResultStatus::SkippedOrFailed);
    let rows = store.pending(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].generated_body, "## First");
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, PipelineEvent::ArticleSkipped { full_name, .. } if full_name == "acme/widget")));
}
