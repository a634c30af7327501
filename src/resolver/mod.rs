//! Format resolution: video reference → [`DeliveryPlan`].
//!
//! Metadata extraction itself is a collaborator behind [`MetadataSource`];
//! this module only decides which of the returned streams to deliver.
//!
//! # Example
//!
//! ```rust,ignore
//! let resolver = FormatResolver::new(Arc::new(YtDlpSource::new("yt-dlp")), SelectionConfig::default());
//! let plan = resolver.resolve("dQw4w9WgXcQ").await?;
//! if plan.is_exceeds {
//!     // tell the user the video is too large
//! }
//! ```

mod selection;
mod video_id;
#[cfg(feature = "ytdlp")]
pub mod ytdlp;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::types::{DeliveryPlan, VideoInfo};

pub use selection::{DEFAULT_SIZE_LIMIT, SelectionConfig, default_codec_for, select_plan};
pub use video_id::{parse_video_id, validate_id};

// ============================================================================
// Collaborator traits
// ============================================================================

/// Source of video metadata and stream URLs.
///
/// Implementations return `NotFound` when the video cannot be fetched.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Fetch basic info and all streams with materialized URLs.
    async fn basic_info(&self, video_id: &str) -> Result<VideoInfo>;
}

/// Best-effort fallback that re-materializes stream URLs.
///
/// Used only when a resolved URL fails its liveness probe.
#[async_trait]
pub trait UrlRefresher: Send + Sync {
    /// Fresh URLs for `itags`, in the same order. Missing entries are empty
    /// strings.
    async fn refresh_urls(&self, video_id: &str, itags: &[u32]) -> Result<Vec<String>>;
}

// ============================================================================
// FormatResolver
// ============================================================================

/// Resolves video ids into delivery plans.
pub struct FormatResolver {
    source: Arc<dyn MetadataSource>,
    config: SelectionConfig,
}

impl FormatResolver {
    pub fn new(source: Arc<dyn MetadataSource>, config: SelectionConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Fetch metadata for `video_id` and select a plan.
    pub async fn resolve(&self, video_id: &str) -> Result<DeliveryPlan> {
        let info = self.source.basic_info(video_id).await?;
        let plan = select_plan(info, &self.config)?;
        info!(
            video_id,
            source = self.source.name(),
            choose_simple = plan.choose_simple,
            is_exceeds = plan.is_exceeds,
            "resolved video"
        );
        Ok(plan)
    }
}
