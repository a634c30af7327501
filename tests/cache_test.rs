//! Tests for the media cache coordinator: single-flight productions,
//! placeholders, failure fan-out, expiry and eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use muninn::{
    Artifact, ArtifactKind, ArtifactMetadata, ArtifactProducer, ArtifactSink, ArtifactState,
    CacheConfig, Delivery, DeliveryPlan, EncodingFormat, MediaCache, MediaEvent, MetadataSource,
    MuninnError, ProgressReporter, Quality, Result, VideoInfo,
};
use tokio::sync::Semaphore;

const ID_A: &str = "aaaaaaaaaaa";
const ID_B: &str = "bbbbbbbbbbb";
const ID_C: &str = "ccccccccccc";

// ============================================================================
// Fakes
// ============================================================================

/// Metadata source serving synthetic videos.
#[derive(Default)]
struct FakeSource {
    calls: AtomicUsize,
    /// Every video stream is larger than the default limit.
    huge: bool,
}

#[async_trait]
impl MetadataSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn basic_info(&self, video_id: &str) -> Result<VideoInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let video_size = if self.huge { 80_000_000 } else { 4_000_000 };
        Ok(VideoInfo {
            video_id: video_id.to_string(),
            title: format!("title {video_id}"),
            author: "channel".into(),
            category: Some("Music".into()),
            duration_secs: 200.0,
            is_live: false,
            thumbnail_url: None,
            source_url: format!("https://www.youtube.com/watch?v={video_id}"),
            formats: vec![
                EncodingFormat::new(140, Quality::Tiny, "https://media.example/140")
                    .with_audio()
                    .container("mp4")
                    .codecs("mp4a.40.2")
                    .audio_bitrate(128_000)
                    .content_length(3_000_000),
                EncodingFormat::new(22, Quality::Hd720, "https://media.example/22")
                    .with_video()
                    .with_audio()
                    .container("mp4")
                    .codecs("avc1.64001F, mp4a.40.2")
                    .content_length(video_size),
            ],
        })
    }
}

/// Producer whose productions can be held back and made to fail.
struct FakeProducer {
    produced: AtomicUsize,
    placeholders: AtomicUsize,
    failures_left: AtomicUsize,
    gate: Option<Semaphore>,
}

impl FakeProducer {
    fn new() -> Self {
        Self {
            produced: AtomicUsize::new(0),
            placeholders: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Productions block until [`open`](Self::open) is called.
    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn failing(self, times: usize) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactProducer for FakeProducer {
    async fn produce(
        &self,
        plan: &DeliveryPlan,
        kind: ArtifactKind,
        progress: ProgressReporter,
    ) -> Result<Artifact> {
        self.produced.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| MuninnError::Io("gate closed".into()))?;
        }
        progress.report(50.0);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MuninnError::DownloadFailed("connection reset".into()));
        }
        Ok(Artifact::from_bytes(
            ArtifactMetadata::for_plan(plan, kind, "mp4"),
            &b"media"[..],
        ))
    }

    async fn placeholder(&self, kind: ArtifactKind) -> Result<Artifact> {
        self.placeholders.fetch_add(1, Ordering::SeqCst);
        Ok(Artifact::from_bytes(
            ArtifactMetadata::placeholder(kind),
            &b"loading"[..],
        ))
    }
}

/// Sink returning `ref:<file name>`.
#[derive(Default)]
struct FakeSink {
    uploads: AtomicUsize,
}

#[async_trait]
impl ArtifactSink for FakeSink {
    fn name(&self) -> &str {
        "fake"
    }

    async fn upload(&self, artifact: Artifact) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = artifact.metadata.file_name.clone();
        artifact.bytes().await?;
        Ok(format!("ref:{name}"))
    }
}

struct Harness {
    cache: MediaCache,
    source: Arc<FakeSource>,
    producer: Arc<FakeProducer>,
    sink: Arc<FakeSink>,
}

fn harness_with(source: FakeSource, producer: FakeProducer, config: CacheConfig) -> Harness {
    let source = Arc::new(source);
    let producer = Arc::new(producer);
    let sink = Arc::new(FakeSink::default());
    let cache = MediaCache::builder()
        .metadata_source(source.clone())
        .producer(producer.clone())
        .sink(sink.clone())
        .cache(config)
        .build()
        .unwrap();
    Harness {
        cache,
        source,
        producer,
        sink,
    }
}

fn harness(producer: FakeProducer) -> Harness {
    harness_with(FakeSource::default(), producer, CacheConfig::default())
}

/// Let spawned productions reach their gate.
async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ============================================================================
// Entries
// ============================================================================

#[tokio::test]
async fn entry_is_resolved_once() {
    let h = harness(FakeProducer::new());
    let entry = h
        .cache
        .get(&format!("https://www.youtube.com/watch?v={ID_A}"))
        .await
        .unwrap();
    assert_eq!(entry.video_id(), ID_A);
    assert!(entry.plan.choose_simple);

    let again = h.cache.get(&format!("https://youtu.be/{ID_A}")).await.unwrap();
    assert_eq!(again.video_id(), ID_A);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn invalid_reference_never_reaches_the_source() {
    let h = harness(FakeProducer::new());
    let result = h.cache.get("https://example.com/not-a-video").await;
    assert!(matches!(result, Err(MuninnError::InvalidReference(_))));
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_last_access() {
    let h = harness_with(
        FakeSource::default(),
        FakeProducer::new(),
        CacheConfig::new().ttl(Duration::from_secs(60)),
    );
    h.cache.get(ID_A).await.unwrap();

    tokio::time::advance(Duration::from_secs(40)).await;
    h.cache.get(ID_A).await.unwrap();
    // 80s after creation but only 40s after the last access.
    tokio::time::advance(Duration::from_secs(40)).await;
    h.cache.get(ID_A).await.unwrap();
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    h.cache.get(ID_A).await.unwrap();
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn capacity_eviction_skips_running_productions() {
    let h = harness_with(
        FakeSource::default(),
        FakeProducer::gated(),
        CacheConfig::new().max_entries(2),
    );
    h.cache.get(ID_A).await.unwrap();
    let running = {
        let cache = h.cache.clone();
        tokio::spawn(async move { cache.get_artifact(ID_A, ArtifactKind::Audio, false).await })
    };
    settle_tasks().await;

    h.cache.get(ID_B).await.unwrap();
    h.cache.get(ID_C).await.unwrap();

    assert_eq!(h.cache.len(), 2);
    assert!(h.cache.subscribe(ID_A, ArtifactKind::Audio).is_ok());
    assert!(matches!(
        h.cache.subscribe(ID_B, ArtifactKind::Audio),
        Err(MuninnError::CacheInconsistency(_))
    ));

    h.producer.open();
    assert_eq!(running.await.unwrap().unwrap(), format!("ref:{ID_A}.mp3"));
}

// ============================================================================
// Artifacts
// ============================================================================

#[tokio::test]
async fn concurrent_requests_share_one_production() {
    let h = harness(FakeProducer::gated());
    h.cache.get(ID_A).await.unwrap();

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let cache = h.cache.clone();
            tokio::spawn(async move { cache.get_artifact(ID_A, ArtifactKind::Audio, false).await })
        })
        .collect();
    settle_tasks().await;
    h.producer.open();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap(), format!("ref:{ID_A}.mp3"));
    }
    assert_eq!(h.producer.produced(), 1);
    assert_eq!(h.sink.uploads.load(Ordering::SeqCst), 1);

    // Ready artifacts are served from the cache.
    let reference = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Audio, false)
        .await
        .unwrap();
    assert_eq!(reference, format!("ref:{ID_A}.mp3"));
    assert_eq!(h.producer.produced(), 1);

    let entry = h.cache.get(ID_A).await.unwrap();
    assert!(entry.readiness.contains(ArtifactKind::Audio));
    assert!(!entry.readiness.contains(ArtifactKind::Video));
}

#[tokio::test]
async fn placeholder_is_served_while_in_flight() {
    let h = harness(FakeProducer::gated());
    h.cache.get(ID_A).await.unwrap();

    let first = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Video, true)
        .await
        .unwrap();
    assert_eq!(first, "ref:placeholder.mp4");
    let second = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Video, true)
        .await
        .unwrap();
    assert_eq!(second, "ref:placeholder.mp4");
    assert_eq!(h.producer.placeholders.load(Ordering::SeqCst), 1);

    let subscription = h.cache.subscribe(ID_A, ArtifactKind::Video).unwrap();
    h.producer.open();
    assert_eq!(subscription.wait().await.unwrap(), format!("ref:{ID_A}.mp4"));

    let ready = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Video, true)
        .await
        .unwrap();
    assert_eq!(ready, format!("ref:{ID_A}.mp4"));
    assert_eq!(h.producer.produced(), 1);
}

#[tokio::test]
async fn subscribers_see_progress_and_result() {
    let h = harness(FakeProducer::gated());
    h.cache.get(ID_A).await.unwrap();
    let mut events = h.cache.subscribe(ID_A, ArtifactKind::Audio).unwrap();

    let production = {
        let cache = h.cache.clone();
        tokio::spawn(async move { cache.get_artifact(ID_A, ArtifactKind::Audio, false).await })
    };
    settle_tasks().await;
    h.producer.open();

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let done = event.is_terminal();
        seen.push(event);
        if done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            MediaEvent::Started,
            MediaEvent::Progress(50.0),
            MediaEvent::Succeeded(format!("ref:{ID_A}.mp3")),
        ]
    );
    production.await.unwrap().unwrap();

    // Late subscribers get the terminal event replayed.
    let late = h.cache.subscribe(ID_A, ArtifactKind::Audio).unwrap();
    assert_eq!(late.wait().await.unwrap(), format!("ref:{ID_A}.mp3"));
}

#[tokio::test]
async fn failure_reaches_every_waiter_and_next_request_starts_over() {
    let h = harness(FakeProducer::gated().failing(1));
    h.cache.get(ID_A).await.unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let cache = h.cache.clone();
            tokio::spawn(async move { cache.get_artifact(ID_A, ArtifactKind::Audio, false).await })
        })
        .collect();
    settle_tasks().await;
    h.producer.open();

    for waiter in waiters {
        assert!(matches!(
            waiter.await.unwrap(),
            Err(MuninnError::DownloadFailed(_))
        ));
    }
    let entry = h.cache.get(ID_A).await.unwrap();
    assert!(matches!(
        entry.state(ArtifactKind::Audio),
        ArtifactState::Failed(MuninnError::DownloadFailed(_))
    ));

    let retried = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Audio, false)
        .await
        .unwrap();
    assert_eq!(retried, format!("ref:{ID_A}.mp3"));
    assert_eq!(h.producer.produced(), 2);
}

#[tokio::test]
async fn oversized_video_is_refused_but_audio_is_served() {
    let h = harness_with(
        FakeSource {
            huge: true,
            ..FakeSource::default()
        },
        FakeProducer::new(),
        CacheConfig::default(),
    );
    let entry = h.cache.get(ID_A).await.unwrap();
    assert!(entry.plan.is_exceeds);

    match h.cache.get_artifact(ID_A, ArtifactKind::Video, true).await {
        Err(MuninnError::SizeExceeded { video_id, limit }) => {
            assert_eq!(video_id, ID_A);
            assert_eq!(limit, 50_000_000);
        }
        other => panic!("expected SizeExceeded, got {other:?}"),
    }
    assert_eq!(h.producer.produced(), 0);

    let audio = h
        .cache
        .get_artifact(ID_A, ArtifactKind::Audio, false)
        .await
        .unwrap();
    assert_eq!(audio, format!("ref:{ID_A}.mp3"));
}

// ============================================================================
// Direct delivery
// ============================================================================

#[tokio::test]
async fn fresh_download_completion_wakes_waiters() {
    let h = harness(FakeProducer::new());
    h.cache.get(ID_A).await.unwrap();

    let Delivery::Fresh {
        artifact,
        completion,
    } = h.cache.download(ID_A, ArtifactKind::Audio).await.unwrap()
    else {
        panic!("expected a fresh delivery");
    };
    assert_eq!(completion.kind(), ArtifactKind::Audio);
    assert_eq!(&artifact.bytes().await.unwrap()[..], b"media");

    let waiter = {
        let cache = h.cache.clone();
        tokio::spawn(async move { cache.get_artifact(ID_A, ArtifactKind::Audio, false).await })
    };
    settle_tasks().await;
    completion.complete("message:42").await;

    assert_eq!(waiter.await.unwrap().unwrap(), "message:42");
    match h.cache.download(ID_A, ArtifactKind::Audio).await.unwrap() {
        Delivery::Cached(reference) => assert_eq!(reference, "message:42"),
        other => panic!("expected a cached delivery, got {other:?}"),
    }
    assert_eq!(h.producer.produced(), 1);
    assert_eq!(h.sink.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn abandoned_delivery_lets_the_next_request_start_over() {
    let h = harness(FakeProducer::new());
    h.cache.get(ID_A).await.unwrap();

    let delivery = h.cache.download(ID_A, ArtifactKind::Video).await.unwrap();
    assert!(matches!(delivery, Delivery::Fresh { .. }));
    drop(delivery);

    let entry = h.cache.get(ID_A).await.unwrap();
    assert!(matches!(
        entry.state(ArtifactKind::Video),
        ArtifactState::Failed(MuninnError::Delivery(_))
    ));

    let again = h.cache.download(ID_A, ArtifactKind::Video).await.unwrap();
    assert!(matches!(again, Delivery::Fresh { .. }));
    assert_eq!(h.producer.produced(), 2);
}

#[tokio::test]
async fn failed_delivery_is_reported_to_waiters() {
    let h = harness(FakeProducer::new());
    h.cache.get(ID_A).await.unwrap();

    let Delivery::Fresh { completion, .. } =
        h.cache.download(ID_A, ArtifactKind::Audio).await.unwrap()
    else {
        panic!("expected a fresh delivery");
    };
    let subscription = h.cache.subscribe(ID_A, ArtifactKind::Audio).unwrap();
    completion.fail(MuninnError::Delivery("upload rejected".into()));

    assert_eq!(
        subscription.wait().await,
        Err(MuninnError::Delivery("upload rejected".into()))
    );
}

#[tokio::test]
async fn builder_requires_collaborators() {
    let result = MediaCache::builder()
        .metadata_source(Arc::new(FakeSource::default()))
        .build();
    assert!(matches!(result, Err(MuninnError::Configuration(_))));
}
