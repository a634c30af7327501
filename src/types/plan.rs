//! Video metadata and the delivery plan derived from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::format::EncodingFormat;
use crate::MuninnError;

/// The two deliverable variants of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Audio,
    Video,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Audio, ArtifactKind::Video];

    /// Readiness bit for this kind (audio = 1, video = 2).
    pub fn bit(self) -> u8 {
        match self {
            ArtifactKind::Audio => 1,
            ArtifactKind::Video => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            ArtifactKind::Audio => 0,
            ArtifactKind::Video => 1,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = MuninnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(ArtifactKind::Audio),
            "video" => Ok(ArtifactKind::Video),
            other => Err(MuninnError::Configuration(format!(
                "unknown artifact kind: {other}"
            ))),
        }
    }
}

/// Basic information about a video, as returned by a
/// [`MetadataSource`](crate::resolver::MetadataSource).
#[derive(Debug, Clone)]
pub struct VideoInfo {
    /// 11-character platform id.
    pub video_id: String,
    pub title: String,
    /// Channel name, used as the audio "artist".
    pub author: String,
    pub category: Option<String>,
    pub duration_secs: f64,
    pub is_live: bool,
    pub thumbnail_url: Option<String>,
    /// Canonical watch URL.
    pub source_url: String,
    pub formats: Vec<EncodingFormat>,
}

/// How a video will be delivered.
///
/// Built once per video by [`select_plan`](crate::resolver::select_plan).
/// If `choose_simple` is set, `simple_format` is present; if not and the
/// plan does not exceed the size limit, `video_format` is present.
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    pub video_id: String,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub duration_secs: f64,
    pub thumbnail_url: Option<String>,
    pub source_url: String,
    /// Best pure-audio stream, or the best full stream when the video has
    /// no separate audio track.
    pub audio_format: EncodingFormat,
    /// Best full (audio + video) stream under the size limit.
    pub simple_format: Option<EncodingFormat>,
    /// Best video-only stream that fits the limit together with `audio_format`.
    pub video_format: Option<EncodingFormat>,
    pub choose_simple: bool,
    pub is_exceeds: bool,
}

impl DeliveryPlan {
    /// Whether the video artifact needs a merge of two streams.
    pub fn needs_merge(&self) -> bool {
        !self.choose_simple && !self.is_exceeds
    }

    /// Whether the music category applies (callers send audio first).
    pub fn is_music(&self) -> bool {
        self.category.as_deref() == Some("Music")
    }
}
