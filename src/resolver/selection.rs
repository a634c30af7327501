//! Size-bounded format selection.
//!
//! Picks how a video is delivered: as one full stream ("simple"), or as a
//! video-only stream merged with an audio-only stream. The rules, in order:
//!
//! 1. Drop every video-capable stream whose size is not below the limit.
//! 2. `simple_format` is the best remaining full stream.
//! 3. `audio_format` is the best pure-audio stream (highest bitrate).
//! 4. An HQ simple stream wins outright.
//! 5. Otherwise the best video-only stream in the preferred container and
//!    codec that still fits next to the audio becomes `video_format`.
//! 6. Simple wins when its quality is greater *or equal*: a single request
//!    beats a merge at the same quality.

use std::cmp::Reverse;

use tracing::debug;

use crate::types::{DeliveryPlan, EncodingFormat, VideoInfo};
use crate::{MuninnError, Result};

/// Default artifact size limit: 50 MB.
pub const DEFAULT_SIZE_LIMIT: u64 = 50 * 1000 * 1000;

/// Selection parameters.
///
/// ```rust
/// # use muninn::SelectionConfig;
/// let config = SelectionConfig::new()
///     .max_artifact_bytes(45_000_000)
///     .container("webm");
/// assert_eq!(config.video_codec, "vp9");
/// ```
#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Upper bound (exclusive) for a delivered artifact. Default: 50 MB.
    pub max_artifact_bytes: u64,
    /// Preferred output container for merges. Default: `mp4`.
    pub container: String,
    /// Codec prefix a video-only stream must carry. Default: `avc1`
    /// (`vp9` for webm).
    pub video_codec: String,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: DEFAULT_SIZE_LIMIT,
            container: "mp4".to_string(),
            video_codec: "avc1".to_string(),
        }
    }
}

impl SelectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size limit in bytes.
    pub fn max_artifact_bytes(mut self, bytes: u64) -> Self {
        self.max_artifact_bytes = bytes;
        self
    }

    /// Set the preferred container; also resets the codec to the
    /// container's usual one.
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self.video_codec = default_codec_for(&self.container).to_string();
        self
    }

    /// Override the required video codec prefix.
    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }
}

/// Codec a container is paired with when no codec is configured.
pub fn default_codec_for(container: &str) -> &'static str {
    match container {
        "webm" => "vp9",
        _ => "avc1",
    }
}

/// Build the delivery plan for `info`.
///
/// Fails with `LiveStreamUnsupported` for live broadcasts and
/// `NoViableFormat` when the video has no usable audio track at all.
pub fn select_plan(info: VideoInfo, config: &SelectionConfig) -> Result<DeliveryPlan> {
    if info.is_live {
        return Err(MuninnError::LiveStreamUnsupported);
    }
    let limit = config.max_artifact_bytes;

    // Stable sort keeps the source order among equal qualities.
    let mut video_capable: Vec<&EncodingFormat> = info
        .formats
        .iter()
        .filter(|f| f.has_video && f.content_length < limit)
        .collect();
    video_capable.sort_by_key(|f| Reverse(f.quality));

    let simple_format = video_capable.iter().find(|f| f.has_audio).map(|f| (*f).clone());

    let audio_format = best_audio(&info.formats)
        .or_else(|| {
            // No separate audio track: use the audio of a full stream.
            info.formats
                .iter()
                .filter(|f| f.is_full())
                .min_by_key(|f| (Reverse(f.quality), f.content_length))
        })
        .cloned()
        .ok_or_else(|| MuninnError::NoViableFormat(info.video_id.clone()))?;

    let mut plan = DeliveryPlan {
        video_id: info.video_id,
        title: info.title,
        author: info.author,
        category: info.category,
        duration_secs: info.duration_secs,
        thumbnail_url: info.thumbnail_url,
        source_url: info.source_url,
        audio_format,
        simple_format,
        video_format: None,
        choose_simple: false,
        is_exceeds: false,
    };

    if plan.simple_format.as_ref().is_some_and(|f| f.is_hq()) {
        debug!(video_id = %plan.video_id, "HQ full stream available, skipping merge");
        plan.choose_simple = true;
        return Ok(plan);
    }

    let audio_len = plan.audio_format.content_length;
    let candidates: Vec<&EncodingFormat> = video_capable
        .into_iter()
        .filter(|f| {
            f.is_video_only()
                && f.container.contains(&config.container)
                && f.codecs.contains(&config.video_codec)
                && f.content_length + audio_len < limit
        })
        .collect();
    plan.video_format = candidates
        .iter()
        .find(|f| f.is_hq())
        .or_else(|| candidates.first())
        .map(|f| (*f).clone());

    plan.choose_simple = match (&plan.simple_format, &plan.video_format) {
        (Some(_), None) => true,
        (Some(simple), Some(video)) => simple.quality >= video.quality,
        (None, _) => false,
    };
    plan.is_exceeds = plan.simple_format.is_none() && plan.video_format.is_none();

    debug!(
        video_id = %plan.video_id,
        choose_simple = plan.choose_simple,
        is_exceeds = plan.is_exceeds,
        "delivery plan selected"
    );
    Ok(plan)
}

/// Highest-bitrate pure-audio stream, larger size breaking ties.
fn best_audio(formats: &[EncodingFormat]) -> Option<&EncodingFormat> {
    formats
        .iter()
        .filter(|f| f.is_audio_only())
        .max_by_key(|f| (f.audio_bitrate.unwrap_or(0), f.content_length))
}
