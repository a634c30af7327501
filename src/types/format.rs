//! Encoding formats and their quality ordering.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::MuninnError;

/// Quality label of a stream, ordered from worst to best.
///
/// Comparisons use the position in this fixed list, so `Ord` is the
/// quality ordering used for selection and tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Tiny,
    Small,
    Medium,
    Large,
    Hd720,
    Hd1080,
    Hd1440,
    Hd2160,
    Highres,
}

impl Quality {
    /// All labels in ascending order.
    pub const ALL: [Quality; 9] = [
        Quality::Tiny,
        Quality::Small,
        Quality::Medium,
        Quality::Large,
        Quality::Hd720,
        Quality::Hd1080,
        Quality::Hd1440,
        Quality::Hd2160,
        Quality::Highres,
    ];

    /// Lowest quality considered "HQ" (480p).
    pub const HQ_CUTOFF: Quality = Quality::Large;

    /// Position in the ordered label list.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this quality is at or above the HQ cutoff.
    pub fn is_hq(self) -> bool {
        self >= Self::HQ_CUTOFF
    }

    /// Platform label (`"hd720"`, `"tiny"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Tiny => "tiny",
            Quality::Small => "small",
            Quality::Medium => "medium",
            Quality::Large => "large",
            Quality::Hd720 => "hd720",
            Quality::Hd1080 => "hd1080",
            Quality::Hd1440 => "hd1440",
            Quality::Hd2160 => "hd2160",
            Quality::Highres => "highres",
        }
    }

    /// Map a frame height to the label the platform uses for it.
    pub fn from_height(height: u32) -> Self {
        match height {
            0..=144 => Quality::Tiny,
            145..=240 => Quality::Small,
            241..=360 => Quality::Medium,
            361..=480 => Quality::Large,
            481..=720 => Quality::Hd720,
            721..=1080 => Quality::Hd1080,
            1081..=1440 => Quality::Hd1440,
            1441..=2160 => Quality::Hd2160,
            _ => Quality::Highres,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = MuninnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| MuninnError::Metadata(format!("unknown quality label: {s}")))
    }
}

/// A media URL that can be replaced while other holders keep using it.
///
/// Signed stream URLs expire; a refresh writes the new URL here and wakes
/// anyone waiting in [`MediaUrl::refreshed`].
#[derive(Debug)]
pub struct MediaUrl {
    current: watch::Sender<String>,
}

impl MediaUrl {
    pub fn new(url: impl Into<String>) -> Self {
        let (current, _) = watch::channel(url.into());
        Self { current }
    }

    /// Current URL.
    pub fn get(&self) -> String {
        self.current.borrow().clone()
    }

    /// Replace the URL and wake waiters.
    pub fn set(&self, url: impl Into<String>) {
        self.current.send_replace(url.into());
    }

    /// Wait for the next [`set`](Self::set) after this call.
    ///
    /// Returns the new URL.
    pub fn refreshed(&self) -> impl Future<Output = String> + Send + 'static {
        let mut rx = self.current.subscribe();
        async move {
            // The sender lives as long as `self`; a closed channel only
            // happens when the format is dropped, so fall back to the last value.
            let _ = rx.changed().await;
            rx.borrow_and_update().clone()
        }
    }
}

/// One candidate stream of a video.
///
/// Cloning shares the URL cell, so a refresh is visible to every clone.
#[derive(Debug, Clone)]
pub struct EncodingFormat {
    /// Platform format id (YouTube "itag").
    pub itag: u32,
    pub has_video: bool,
    pub has_audio: bool,
    pub quality: Quality,
    /// Container tag, e.g. `mp4` or `webm`.
    pub container: String,
    /// Codec string, e.g. `avc1.640028` or `opus`.
    pub codecs: String,
    /// Size in bytes, `0` when unknown.
    pub content_length: u64,
    /// Audio bitrate in bits per second, used to rank audio-only streams.
    pub audio_bitrate: Option<u64>,
    url: Arc<MediaUrl>,
}

impl EncodingFormat {
    pub fn new(itag: u32, quality: Quality, url: impl Into<String>) -> Self {
        Self {
            itag,
            has_video: false,
            has_audio: false,
            quality,
            container: String::new(),
            codecs: String::new(),
            content_length: 0,
            audio_bitrate: None,
            url: Arc::new(MediaUrl::new(url)),
        }
    }

    pub fn with_video(mut self) -> Self {
        self.has_video = true;
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn codecs(mut self, codecs: impl Into<String>) -> Self {
        self.codecs = codecs.into();
        self
    }

    pub fn content_length(mut self, bytes: u64) -> Self {
        self.content_length = bytes;
        self
    }

    pub fn audio_bitrate(mut self, bps: u64) -> Self {
        self.audio_bitrate = Some(bps);
        self
    }

    /// Whether the stream carries both audio and video.
    pub fn is_full(&self) -> bool {
        self.has_video && self.has_audio
    }

    /// Whether the stream quality is at or above the HQ cutoff.
    pub fn is_hq(&self) -> bool {
        self.quality.is_hq()
    }

    /// Pure audio stream.
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Pure video stream.
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    /// Small full streams are fetched in one request; everything else in
    /// ranged chunks.
    pub fn prefers_single_request(&self) -> bool {
        self.is_full() && !self.is_hq()
    }

    /// Current download URL.
    pub fn url(&self) -> String {
        self.url.get()
    }

    /// Replace the download URL (visible to all clones).
    pub fn set_url(&self, url: impl Into<String>) {
        self.url.set(url);
    }

    /// Shared URL cell.
    pub fn media_url(&self) -> &Arc<MediaUrl> {
        &self.url
    }
}

/// Format a byte count with decimal units (`"12.3 MB"`), matching the
/// decimal size limit.
pub fn bytes_to_human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
