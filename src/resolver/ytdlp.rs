//! yt-dlp backed metadata source and URL refresher.
//!
//! Runs `yt-dlp -J` once per video and maps its format list onto
//! [`EncodingFormat`]s. Only plain HTTPS formats with numeric ids are
//! kept: manifests (HLS/DASH) cannot be fetched with ranged requests.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{MetadataSource, UrlRefresher};
use crate::types::{EncodingFormat, Quality, VideoInfo};
use crate::{MuninnError, Result};

/// Metadata source and URL refresher backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    program: PathBuf,
}

impl YtDlpSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                MuninnError::Configuration(format!(
                    "failed to run {}: {e}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("yt-dlp failed")
                .to_string();
            return Err(MuninnError::NotFound(reason));
        }
        Ok(output.stdout)
    }
}

fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[async_trait]
impl MetadataSource for YtDlpSource {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn basic_info(&self, video_id: &str) -> Result<VideoInfo> {
        let url = watch_url(video_id);
        let stdout = self
            .run(&["-J", "--no-playlist", "--no-warnings", &url])
            .await?;
        let raw: RawInfo = serde_json::from_slice(&stdout)?;
        debug!(video_id, formats = raw.formats.len(), "yt-dlp metadata fetched");
        Ok(raw.into_video_info(url))
    }
}

#[async_trait]
impl UrlRefresher for YtDlpSource {
    async fn refresh_urls(&self, video_id: &str, itags: &[u32]) -> Result<Vec<String>> {
        let selector = itags
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = watch_url(video_id);
        let stdout = self
            .run(&["-f", &selector, "--get-url", "--no-warnings", &url])
            .await?;
        let mut urls: Vec<String> = String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if urls.len() != itags.len() {
            warn!(
                video_id,
                requested = itags.len(),
                returned = urls.len(),
                "yt-dlp returned a different number of URLs"
            );
        }
        urls.resize(itags.len(), String::new());
        Ok(urls)
    }
}

// ============================================================================
// yt-dlp JSON
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawInfo {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    url: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<u64>,
    /// Audio bitrate in kbit/s.
    #[serde(default)]
    abr: Option<f64>,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| c != "none" && !c.is_empty())
}

impl RawInfo {
    fn into_video_info(self, source_url: String) -> VideoInfo {
        let formats = self
            .formats
            .into_iter()
            .filter_map(RawFormat::into_format)
            .collect();
        VideoInfo {
            video_id: self.id,
            title: self.title,
            author: self.channel.or(self.uploader).unwrap_or_default(),
            category: self.categories.into_iter().next(),
            duration_secs: self.duration.unwrap_or(0.0),
            is_live: self.is_live.unwrap_or(false),
            thumbnail_url: self.thumbnail,
            source_url,
            formats,
        }
    }
}

impl RawFormat {
    fn into_format(self) -> Option<EncodingFormat> {
        if self.protocol.as_deref().is_some_and(|p| p != "https" && p != "http") {
            return None;
        }
        let itag = self.format_id.parse::<u32>().ok()?;
        let url = self.url?;
        let has_video = codec_present(&self.vcodec);
        let has_audio = codec_present(&self.acodec);
        if !has_video && !has_audio {
            return None;
        }

        let quality = match (has_video, self.height) {
            (true, Some(h)) => Quality::from_height(h),
            _ => Quality::Tiny,
        };
        let codecs = [self.vcodec, self.acodec]
            .into_iter()
            .flatten()
            .filter(|c| c != "none")
            .collect::<Vec<_>>()
            .join(", ");

        let mut format = EncodingFormat::new(itag, quality, url)
            .container(self.ext.unwrap_or_default())
            .codecs(codecs)
            .content_length(self.filesize.or(self.filesize_approx).unwrap_or(0));
        if has_video {
            format = format.with_video();
        }
        if has_audio {
            format = format.with_audio();
        }
        if let Some(abr) = self.abr {
            format = format.audio_bitrate((abr * 1000.0) as u64);
        }
        Some(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "channel": "Rick Astley",
            "categories": ["Music"],
            "duration": 212.0,
            "is_live": false,
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg",
            "formats": [
                {"format_id": "sb0", "url": "https://i.ytimg.com/sb", "protocol": "mhtml", "vcodec": "none", "acodec": "none"},
                {"format_id": "251", "url": "https://rr.example/251", "protocol": "https", "ext": "webm",
                 "vcodec": "none", "acodec": "opus", "abr": 129.5, "filesize": 3500000},
                {"format_id": "136", "url": "https://rr.example/136", "protocol": "https", "ext": "mp4",
                 "vcodec": "avc1.4d401f", "acodec": "none", "height": 720, "filesize_approx": 9000000},
                {"format_id": "18", "url": "https://rr.example/18", "protocol": "https", "ext": "mp4",
                 "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "filesize": 11000000},
                {"format_id": "96", "url": "https://manifest.example/96", "protocol": "m3u8_native",
                 "vcodec": "avc1", "acodec": "mp4a", "height": 1080}
            ]
        }"#
    }

    #[test]
    fn maps_formats_and_details() {
        let raw: RawInfo = serde_json::from_str(sample()).unwrap();
        let info = raw.into_video_info(watch_url("dQw4w9WgXcQ"));

        assert_eq!(info.author, "Rick Astley");
        assert_eq!(info.category.as_deref(), Some("Music"));
        assert_eq!(info.formats.len(), 3, "storyboard and HLS formats dropped");

        let audio = info.formats.iter().find(|f| f.itag == 251).unwrap();
        assert!(audio.is_audio_only());
        assert_eq!(audio.audio_bitrate, Some(129_500));

        let video = info.formats.iter().find(|f| f.itag == 136).unwrap();
        assert!(video.is_video_only());
        assert_eq!(video.quality, Quality::Hd720);
        assert_eq!(video.content_length, 9_000_000);

        let full = info.formats.iter().find(|f| f.itag == 18).unwrap();
        assert!(full.is_full());
        assert_eq!(full.quality, Quality::Medium);
        assert_eq!(full.codecs, "avc1.42001E, mp4a.40.2");
    }
}
