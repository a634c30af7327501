//! File configuration.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.muninn/config.toml` (user)
//! 3. `/etc/muninn/config.toml` (system)
//!
//! Every key is optional; missing keys take the defaults of the
//! programmatic config structs.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, MediaCacheBuilder};
use crate::download::{DEFAULT_CHUNK_SIZE, DEFAULT_RETRY_STATUSES, DownloadConfig, LivenessConfig, RetryConfig};
use crate::mux::MuxConfig;
use crate::resolver::{DEFAULT_SIZE_LIMIT, SelectionConfig};
use crate::{MuninnError, Result};

/// Muninn configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub selection: SelectionSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub mux: MuxSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub ytdlp: YtDlpSection,
}

/// Format selection.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionSection {
    /// Exclusive artifact size limit in bytes (default: 50 MB).
    #[serde(default = "default_size_limit")]
    pub max_artifact_bytes: u64,
    /// Merge container (default: mp4).
    #[serde(default = "default_container")]
    pub container: String,
    /// Video codec prefix; defaults to the container's usual codec.
    #[serde(default)]
    pub video_codec: Option<String>,
}

impl Default for SelectionSection {
    fn default() -> Self {
        Self {
            max_artifact_bytes: default_size_limit(),
            container: default_container(),
            video_codec: None,
        }
    }
}

fn default_size_limit() -> u64 {
    DEFAULT_SIZE_LIMIT
}

fn default_container() -> String {
    "mp4".to_string()
}

/// Downloads.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    /// Ranged request size in bytes, 0 disables chunking (default: 10 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Response timeout in seconds (default: 10).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Retries per request (default: 3).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Statuses that are retried (default: 403, 408, 500, 502, 503, 504).
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
            retries: default_retries(),
            retry_statuses: default_retry_statuses(),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_request_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_retry_statuses() -> Vec<u16> {
    DEFAULT_RETRY_STATUSES.to_vec()
}

/// URL liveness checks.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessSection {
    /// Hard limit on waiting for a refreshed URL (default: 15).
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

fn default_refresh_timeout() -> u64 {
    15
}

/// Encoder.
#[derive(Debug, Clone, Deserialize)]
pub struct MuxSection {
    /// ffmpeg executable (default: `ffmpeg`).
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,
    /// Directory for merge outputs (default: system temp dir + `/muninn`).
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Attach thumbnails to mp3 artifacts (default: true).
    #[serde(default = "default_true")]
    pub embed_cover: bool,
}

impl Default for MuxSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            temp_dir: None,
            embed_cover: true,
        }
    }
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_true() -> bool {
    true
}

/// Entry cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Maximum cached videos (default: 500).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Seconds an entry lives after its last access (default: 3600).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl(),
        }
    }
}

fn default_max_entries() -> usize {
    500
}

fn default_ttl() -> u64 {
    3600
}

/// yt-dlp collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct YtDlpSection {
    /// yt-dlp executable (default: `yt-dlp`).
    #[serde(default = "default_ytdlp")]
    pub path: PathBuf,
    /// Use yt-dlp to refresh stale stream URLs (default: true).
    #[serde(default = "default_true")]
    pub refresh_urls: bool,
}

impl Default for YtDlpSection {
    fn default() -> Self {
        Self {
            path: default_ytdlp(),
            refresh_urls: true,
        }
    }
}

fn default_ytdlp() -> PathBuf {
    PathBuf::from("yt-dlp")
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided, must exist)
    /// 2. `~/.muninn/config.toml`
    /// 3. `/etc/muninn/config.toml`
    ///
    /// Returns the defaults when no file exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Config::default()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MuninnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MuninnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muninn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/muninn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    pub fn selection_config(&self) -> SelectionConfig {
        let config = SelectionConfig::new()
            .max_artifact_bytes(self.selection.max_artifact_bytes)
            .container(self.selection.container.clone());
        match &self.selection.video_codec {
            Some(codec) => config.video_codec(codec.clone()),
            None => config,
        }
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig::new()
            .chunk_size(self.download.chunk_size)
            .request_timeout(Duration::from_secs(self.download.request_timeout_secs))
            .retry(
                RetryConfig::new()
                    .max_retries(self.download.retries)
                    .statuses(self.download.retry_statuses.clone()),
            )
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig::new().refresh_timeout(Duration::from_secs(self.liveness.refresh_timeout_secs))
    }

    pub fn mux_config(&self) -> MuxConfig {
        let config = MuxConfig::new()
            .ffmpeg_path(self.mux.ffmpeg_path.clone())
            .container(self.selection.container.clone())
            .embed_cover(self.mux.embed_cover);
        match &self.mux.temp_dir {
            Some(dir) => config.temp_dir(dir.clone()),
            None => config,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.cache.max_entries)
            .ttl(Duration::from_secs(self.cache.ttl_secs))
    }

    /// Apply every section to `builder`. Collaborators are left to the caller.
    pub fn apply(&self, builder: MediaCacheBuilder) -> MediaCacheBuilder {
        builder
            .selection(self.selection_config())
            .download(self.download_config())
            .liveness(self.liveness_config())
            .mux(self.mux_config())
            .cache(self.cache_config())
    }
}
