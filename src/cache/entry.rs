//! Cached video entries and per-artifact state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use super::events::ArtifactSubscription;
use crate::MuninnError;
use crate::types::{ArtifactKind, DeliveryPlan, MediaEvent};

/// Production state of one artifact kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactState {
    NotStarted,
    /// A production is running; new requests subscribe to it.
    InFlight,
    /// Delivered under this external reference. Terminal until eviction.
    Ready(String),
    /// The last production failed. New requests start over.
    Failed(MuninnError),
}

impl ArtifactState {
    pub fn reference(&self) -> Option<&str> {
        match self {
            ArtifactState::Ready(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ArtifactState::InFlight)
    }
}

/// Bitmask of ready artifact kinds (audio = 1, video = 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(u8);

impl Readiness {
    pub const NONE: Readiness = Readiness(0);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, kind: ArtifactKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub(crate) fn with(self, kind: ArtifactKind) -> Self {
        Readiness(self.0 | kind.bit())
    }
}

/// Point-in-time view of a cached video.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub plan: Arc<DeliveryPlan>,
    pub readiness: Readiness,
    audio: ArtifactState,
    video: ArtifactState,
}

impl MediaEntry {
    pub fn video_id(&self) -> &str {
        &self.plan.video_id
    }

    pub fn state(&self, kind: ArtifactKind) -> &ArtifactState {
        match kind {
            ArtifactKind::Audio => &self.audio,
            ArtifactKind::Video => &self.video,
        }
    }
}

/// State and event channel of one artifact kind.
pub(crate) struct Slot {
    pub state: ArtifactState,
    pub events: broadcast::Sender<MediaEvent>,
}

impl Slot {
    fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer);
        Self {
            state: ArtifactState::NotStarted,
            events,
        }
    }

    /// Subscribe, replaying the terminal state if the slot already settled.
    pub fn subscribe(&self) -> ArtifactSubscription {
        let replay = match &self.state {
            ArtifactState::Ready(reference) => Some(MediaEvent::Succeeded(reference.clone())),
            ArtifactState::Failed(err) => Some(MediaEvent::Failed(err.clone())),
            _ => None,
        };
        ArtifactSubscription::new(replay, self.events.subscribe())
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn publish(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }
}

/// A cached video.
pub(crate) struct Entry {
    pub plan: Arc<DeliveryPlan>,
    pub readiness: Readiness,
    pub last_access: Instant,
    slots: [Slot; 2],
}

impl Entry {
    pub fn new(plan: Arc<DeliveryPlan>, event_buffer: usize) -> Self {
        Self {
            plan,
            readiness: Readiness::NONE,
            last_access: Instant::now(),
            slots: [Slot::new(event_buffer), Slot::new(event_buffer)],
        }
    }

    pub fn slot(&self, kind: ArtifactKind) -> &Slot {
        &self.slots[kind.slot()]
    }

    pub fn slot_mut(&mut self, kind: ArtifactKind) -> &mut Slot {
        &mut self.slots[kind.slot()]
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_access = now;
    }

    /// Whether any production for this entry is running.
    pub fn is_in_flight(&self) -> bool {
        self.slots.iter().any(|s| s.state.is_in_flight())
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_access) >= ttl
    }

    /// Expired and not pinned by a running production.
    pub fn is_evictable(&self, now: Instant, ttl: Duration) -> bool {
        self.is_expired(now, ttl) && !self.is_in_flight()
    }

    pub fn snapshot(&self) -> MediaEntry {
        MediaEntry {
            plan: Arc::clone(&self.plan),
            readiness: self.readiness,
            audio: self.slot(ArtifactKind::Audio).state.clone(),
            video: self.slot(ArtifactKind::Video).state.clone(),
        }
    }
}
