//! Muninn - media acquisition and caching for YouTube videos
//!
//! This crate resolves a video into a size-bounded delivery plan, downloads
//! the chosen streams in resilient ranged chunks, merges or transcodes them
//! with ffmpeg, and caches the resulting external references so concurrent
//! requests for the same video share a single production.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use muninn::{ArtifactKind, DirectorySink, MediaCache, SelectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let cache = MediaCache::builder()
//!         .yt_dlp("yt-dlp")
//!         .sink(Arc::new(DirectorySink::new("downloads")))
//!         .selection(SelectionConfig::new().max_artifact_bytes(45_000_000))
//!         .build()?;
//!
//!     let entry = cache.get("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
//!     let path = cache
//!         .get_artifact(entry.video_id(), ArtifactKind::Audio, false)
//!         .await?;
//!     println!("{path}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod mux;
pub mod resolver;
pub mod sink;
pub mod telemetry;
pub mod traits;
pub mod types;

/// Crate version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{
    ArtifactState, ArtifactSubscription, CacheConfig, Completion, Delivery, MediaCache,
    MediaCacheBuilder, MediaEntry, Readiness,
};
pub use config::Config;
pub use download::{ChunkedDownloader, DownloadConfig, LivenessConfig, LivenessGuard, OpenOptions, RetryConfig};
pub use error::{MuninnError, Result};
pub use mux::{FfmpegProgress, MuxConfig, MuxOrchestrator, ProgressParser};
pub use resolver::{FormatResolver, MetadataSource, SelectionConfig, UrlRefresher, parse_video_id};
#[cfg(feature = "ytdlp")]
pub use resolver::ytdlp::YtDlpSource;
pub use sink::DirectorySink;
pub use traits::{ArtifactProducer, ArtifactSink};

// Re-export all types
pub use types::{
    Artifact, ArtifactKind, ArtifactMetadata, ByteStream, DeliveryPlan, EncodingFormat,
    MediaEvent, ProgressReporter, Quality, VideoInfo, bytes_to_human_size,
};
