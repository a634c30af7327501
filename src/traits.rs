//! Seams of the media cache: producing artifacts and delivering them.

use async_trait::async_trait;

use crate::types::{Artifact, ArtifactKind, DeliveryPlan, ProgressReporter};
use crate::{MuninnError, Result};

/// Turns a delivery plan into artifact bytes.
///
/// [`MuxOrchestrator`](crate::MuxOrchestrator) is the production
/// implementation; the cache only depends on this trait.
#[async_trait]
pub trait ArtifactProducer: Send + Sync {
    /// Produce the `kind` artifact of `plan`, publishing progress through
    /// `progress`.
    async fn produce(
        &self,
        plan: &DeliveryPlan,
        kind: ArtifactKind,
        progress: ProgressReporter,
    ) -> Result<Artifact>;

    /// Render the "loading" placeholder for `kind`.
    async fn placeholder(&self, _kind: ArtifactKind) -> Result<Artifact> {
        Err(MuninnError::Unsupported("placeholder"))
    }

    /// Drop local resources kept for `plan` once its artifact is delivered.
    async fn release(&self, _plan: &DeliveryPlan, _kind: ArtifactKind) {}
}

/// Delivery platform that turns artifacts into reusable references.
///
/// A reference is whatever the platform hands back for a stored upload
/// (a file id, object key or path).
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Sink name for logging.
    fn name(&self) -> &str;

    /// Upload `artifact` and return its reference.
    async fn upload(&self, artifact: Artifact) -> Result<String>;
}
