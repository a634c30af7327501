//! The media cache coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moka::future::Cache;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::builder::MediaCacheBuilder;
use super::config::CacheConfig;
use super::entry::{ArtifactState, Entry, MediaEntry};
use super::events::ArtifactSubscription;
use crate::resolver::{FormatResolver, parse_video_id};
use crate::telemetry;
use crate::traits::{ArtifactProducer, ArtifactSink};
use crate::types::{Artifact, ArtifactKind, DeliveryPlan, MediaEvent, ProgressReporter};
use crate::{MuninnError, Result};

/// Entry point of the pipeline: resolves videos once, produces each
/// artifact at most once at a time, and fans results out to every waiter.
///
/// Cloning is cheap and shares the same cache.
///
/// ```rust,ignore
/// let cache = MediaCache::builder()
///     .metadata_source(Arc::new(YtDlpSource::new("yt-dlp")))
///     .sink(Arc::new(my_sink))
///     .build()?;
///
/// let entry = cache.get("https://youtu.be/dQw4w9WgXcQ").await?;
/// let reference = cache
///     .get_artifact(entry.video_id(), ArtifactKind::Audio, false)
///     .await?;
/// ```
#[derive(Clone)]
pub struct MediaCache {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: FormatResolver,
    producer: Arc<dyn ArtifactProducer>,
    sink: Arc<dyn ArtifactSink>,
    config: CacheConfig,
    entries: Mutex<HashMap<String, Entry>>,
    /// Uploaded placeholder references, one per kind, kept for the process
    /// lifetime.
    placeholders: Cache<ArtifactKind, String>,
}

/// What a request has to do once the entry lock is released.
enum Step {
    Ready(String),
    Wait {
        subscription: ArtifactSubscription,
        start: Option<Start>,
        placeholder: bool,
    },
}

/// A production claimed under the entry lock.
struct Start {
    plan: Arc<DeliveryPlan>,
    events: broadcast::Sender<MediaEvent>,
}

impl MediaCache {
    /// Create a new builder.
    pub fn builder() -> MediaCacheBuilder {
        MediaCacheBuilder::new()
    }

    pub(crate) fn from_parts(
        resolver: FormatResolver,
        producer: Arc<dyn ArtifactProducer>,
        sink: Arc<dyn ArtifactSink>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                producer,
                sink,
                config,
                entries: Mutex::new(HashMap::new()),
                placeholders: Cache::new(ArtifactKind::ALL.len() as u64),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Number of cached videos, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // The map stays consistent even if a holder panicked: every update
        // is a single insert/remove/assignment.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Entries
    // ========================================================================

    /// Return the cached entry for `reference` (video id or URL), resolving
    /// it on a miss.
    ///
    /// A live entry is never re-resolved.
    pub async fn get(&self, reference: &str) -> Result<MediaEntry> {
        let video_id = parse_video_id(reference)?;
        if let Some(entry) = self.lookup(&video_id) {
            return Ok(entry);
        }
        let plan = self.inner.resolver.resolve(&video_id).await?;
        Ok(self.insert(plan))
    }

    fn lookup(&self, video_id: &str) -> Option<MediaEntry> {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let mut entries = self.entries();
        let entry = entries.get_mut(video_id)?;
        if entry.is_evictable(now, ttl) {
            entries.remove(video_id);
            metrics::counter!(telemetry::EVICTIONS_TOTAL, "reason" => "ttl").increment(1);
            debug!(video_id, "entry expired");
            return None;
        }
        entry.touch(now);
        Some(entry.snapshot())
    }

    fn insert(&self, plan: DeliveryPlan) -> MediaEntry {
        let mut entries = self.entries();
        let entry = self.admit(&mut entries, Arc::new(plan), Instant::now());
        entry.snapshot()
    }

    /// Insert `plan` unless its video is cached, making room first.
    ///
    /// A concurrent miss may have inserted the same video meanwhile; the
    /// existing entry wins.
    fn admit<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        plan: Arc<DeliveryPlan>,
        now: Instant,
    ) -> &'a mut Entry {
        self.purge_expired(entries, now);
        if !entries.contains_key(&plan.video_id) {
            while entries.len() >= self.inner.config.max_entries {
                if !self.evict_oldest(entries) {
                    break;
                }
            }
        }
        let event_buffer = self.inner.config.event_buffer;
        let entry = entries
            .entry(plan.video_id.clone())
            .or_insert_with(|| Entry::new(plan, event_buffer));
        entry.touch(now);
        entry
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let ttl = self.inner.config.ttl;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_evictable(now, ttl));
        let purged = before - entries.len();
        if purged > 0 {
            metrics::counter!(telemetry::EVICTIONS_TOTAL, "reason" => "ttl").increment(purged as u64);
            debug!(purged, "purged expired entries");
        }
    }

    /// Evict the least recently accessed entry without a running production.
    fn evict_oldest(&self, entries: &mut HashMap<String, Entry>) -> bool {
        let oldest = entries
            .iter()
            .filter(|(_, entry)| !entry.is_in_flight())
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(video_id) => {
                entries.remove(&video_id);
                metrics::counter!(telemetry::EVICTIONS_TOTAL, "reason" => "capacity").increment(1);
                debug!(video_id = %video_id, "evicted oldest entry");
                true
            }
            None => false,
        }
    }

    /// Apply evictions deferred while productions were running.
    fn enforce_limits(&self, entries: &mut HashMap<String, Entry>) {
        self.purge_expired(entries, Instant::now());
        while entries.len() > self.inner.config.max_entries {
            if !self.evict_oldest(entries) {
                break;
            }
        }
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    /// Reference of the `kind` artifact of `video_id`.
    ///
    /// - ready: returned immediately;
    /// - in flight: the placeholder if `allow_placeholder`, otherwise the
    ///   call waits for the running production;
    /// - not started (or failed before): a production starts in the
    ///   background; the call returns the placeholder if allowed, otherwise
    ///   waits for it.
    ///
    /// A production failure is returned to every waiting caller.
    pub async fn get_artifact(
        &self,
        video_id: &str,
        kind: ArtifactKind,
        allow_placeholder: bool,
    ) -> Result<String> {
        let entry = self.get(video_id).await?;
        self.check_deliverable(&entry.plan, kind)?;

        match self.claim(&entry, kind, allow_placeholder)? {
            Step::Ready(reference) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "kind" => kind.as_str()).increment(1);
                Ok(reference)
            }
            Step::Wait {
                subscription,
                start,
                placeholder,
            } => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "kind" => kind.as_str())
                    .increment(1);
                if let Some(start) = start {
                    self.spawn_production(kind, start);
                }
                if placeholder {
                    match self.placeholder(kind).await {
                        Ok(reference) => return Ok(reference),
                        Err(e) => {
                            warn!(kind = %kind, error = %e, "placeholder unavailable, waiting for artifact");
                        }
                    }
                }
                subscription.wait().await
            }
        }
    }

    /// Read the slot state and claim the production if nobody runs it.
    ///
    /// The entry may have been evicted since `cached` was read; it is then
    /// admitted again from the same plan.
    fn claim(&self, cached: &MediaEntry, kind: ArtifactKind, placeholder: bool) -> Result<Step> {
        let video_id = cached.video_id();
        let now = Instant::now();
        let mut entries = self.entries();
        if !entries.contains_key(video_id) {
            debug!(video_id, "entry evicted before claim, admitting it again");
            self.admit(&mut entries, Arc::clone(&cached.plan), now);
        }
        let entry = entries
            .get_mut(video_id)
            .ok_or_else(|| MuninnError::CacheInconsistency(video_id.to_string()))?;
        entry.touch(now);
        let plan = Arc::clone(&entry.plan);
        let slot = entry.slot_mut(kind);

        let current = slot.state.clone();
        let step = match current {
            ArtifactState::Ready(reference) => Step::Ready(reference),
            ArtifactState::InFlight => Step::Wait {
                subscription: slot.subscribe(),
                start: None,
                placeholder,
            },
            ArtifactState::NotStarted | ArtifactState::Failed(_) => {
                slot.state = ArtifactState::InFlight;
                let subscription = slot.subscribe();
                slot.publish(MediaEvent::Started);
                debug!(video_id, kind = %kind, "production claimed");
                Step::Wait {
                    subscription,
                    start: Some(Start {
                        plan,
                        events: slot.events.clone(),
                    }),
                    placeholder,
                }
            }
        };
        Ok(step)
    }

    /// Produce and upload in a task of its own, so abandoning callers never
    /// cancel it.
    fn spawn_production(&self, kind: ArtifactKind, start: Start) {
        let cache = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let Start { plan, events } = start;
            let progress = ProgressReporter::new(events);
            let result = async {
                let artifact = cache.inner.producer.produce(&plan, kind, progress).await?;
                cache.inner.sink.upload(artifact).await
            }
            .await;
            let delivered = result.is_ok();
            cache.settle(&plan.video_id, kind, result, started);
            if delivered {
                cache.inner.producer.release(&plan, kind).await;
            }
        });
    }

    /// Produce the `kind` artifact for a caller that delivers it itself.
    ///
    /// Returns [`Delivery::Cached`] when the artifact is ready (or a running
    /// production finishes first). Otherwise returns the bytes together with
    /// a [`Completion`] that must be settled with the reference obtained
    /// from delivering them.
    pub async fn download(&self, video_id: &str, kind: ArtifactKind) -> Result<Delivery> {
        let entry = self.get(video_id).await?;
        self.check_deliverable(&entry.plan, kind)?;

        match self.claim(&entry, kind, false)? {
            Step::Ready(reference) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "kind" => kind.as_str()).increment(1);
                Ok(Delivery::Cached(reference))
            }
            Step::Wait {
                subscription,
                start: None,
                ..
            } => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "kind" => kind.as_str())
                    .increment(1);
                Ok(Delivery::Cached(subscription.wait().await?))
            }
            Step::Wait {
                start: Some(Start { plan, events }),
                ..
            } => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "kind" => kind.as_str())
                    .increment(1);
                // Settles the slot even if this future is dropped mid-way.
                let completion = Completion {
                    cache: self.clone(),
                    plan: Arc::clone(&plan),
                    kind,
                    started: Instant::now(),
                    settled: false,
                };
                let produced = self
                    .inner
                    .producer
                    .produce(&plan, kind, ProgressReporter::new(events))
                    .await;
                match produced {
                    Ok(artifact) => Ok(Delivery::Fresh {
                        artifact,
                        completion,
                    }),
                    Err(e) => {
                        completion.fail(e.clone());
                        Err(e)
                    }
                }
            }
        }
    }

    /// Events of the `kind` artifact of a cached video.
    ///
    /// Subscribing to a settled artifact yields its terminal event first.
    pub fn subscribe(&self, video_id: &str, kind: ArtifactKind) -> Result<ArtifactSubscription> {
        let entries = self.entries();
        let entry = entries
            .get(video_id)
            .ok_or_else(|| MuninnError::CacheInconsistency(video_id.to_string()))?;
        Ok(entry.slot(kind).subscribe())
    }

    /// Uploaded "loading" placeholder for `kind`, rendered once per process.
    pub async fn placeholder(&self, kind: ArtifactKind) -> Result<String> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .placeholders
            .try_get_with(kind, async move {
                let artifact = inner.producer.placeholder(kind).await?;
                let reference = inner.sink.upload(artifact).await?;
                info!(kind = %kind, sink = inner.sink.name(), "placeholder uploaded");
                Ok::<_, MuninnError>(reference)
            })
            .await
            .map_err(|e| e.as_ref().clone())
    }

    fn check_deliverable(&self, plan: &DeliveryPlan, kind: ArtifactKind) -> Result<()> {
        if kind == ArtifactKind::Video && plan.is_exceeds {
            return Err(MuninnError::SizeExceeded {
                video_id: plan.video_id.clone(),
                limit: self.inner.resolver.config().max_artifact_bytes,
            });
        }
        Ok(())
    }

    /// Record the outcome of a production and wake its waiters.
    fn settle(
        &self,
        video_id: &str,
        kind: ArtifactKind,
        result: Result<String>,
        started: Instant,
    ) {
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::PRODUCTIONS_TOTAL, "kind" => kind.as_str(), "status" => status)
            .increment(1);
        metrics::histogram!(telemetry::PRODUCTION_DURATION_SECONDS, "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(video_id) else {
            warn!(video_id, kind = %kind, "production settled for a missing entry");
            return;
        };
        match result {
            Ok(reference) => {
                entry.readiness = entry.readiness.with(kind);
                let slot = entry.slot_mut(kind);
                slot.state = ArtifactState::Ready(reference.clone());
                slot.publish(MediaEvent::Succeeded(reference));
                info!(video_id, kind = %kind, "artifact ready");
            }
            Err(e) => {
                let slot = entry.slot_mut(kind);
                slot.state = ArtifactState::Failed(e.clone());
                slot.publish(MediaEvent::Failed(e.clone()));
                warn!(video_id, kind = %kind, error = %e, "production failed");
            }
        }
        self.enforce_limits(&mut entries);
    }
}

// ============================================================================
// Direct delivery
// ============================================================================

/// Result of [`MediaCache::download`].
#[derive(Debug)]
pub enum Delivery {
    /// Already delivered under this reference.
    Cached(String),
    /// Freshly produced bytes; settle `completion` after delivering them.
    Fresh {
        artifact: Artifact,
        completion: Completion,
    },
}

/// Obligation to report how a [`Delivery::Fresh`] artifact was delivered.
///
/// Dropping it unsettled marks the production failed so other requests
/// can start over.
pub struct Completion {
    cache: MediaCache,
    plan: Arc<DeliveryPlan>,
    kind: ArtifactKind,
    started: Instant,
    settled: bool,
}

impl Completion {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Record the delivered reference and wake all waiters.
    pub async fn complete(mut self, reference: impl Into<String>) {
        self.settled = true;
        self.cache
            .settle(&self.plan.video_id, self.kind, Ok(reference.into()), self.started);
        self.cache.inner.producer.release(&self.plan, self.kind).await;
    }

    /// Record a delivery failure; waiters receive `err`.
    pub fn fail(mut self, err: MuninnError) {
        self.settled = true;
        self.cache
            .settle(&self.plan.video_id, self.kind, Err(err), self.started);
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("video_id", &self.plan.video_id)
            .field("kind", &self.kind)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.settle(
                &self.plan.video_id,
                self.kind,
                Err(MuninnError::Delivery("delivery abandoned".to_string())),
                self.started,
            );
        }
    }
}
