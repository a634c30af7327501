//! Muninn error types

/// Muninn error types.
///
/// Payloads are plain strings so the error is `Clone`: a failed production
/// is reported to every caller waiting on it, not just the one that
/// started it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuninnError {
    // Resolution errors
    #[error("live streams cannot be downloaded")]
    LiveStreamUnsupported,

    #[error("video not found: {0}")]
    NotFound(String),

    #[error("no downloadable format for video {0}")]
    NoViableFormat(String),

    #[error("every format of video {video_id} exceeds the {limit} byte limit")]
    SizeExceeded { video_id: String, limit: u64 },

    #[error("invalid video reference: {0}")]
    InvalidReference(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    // Network errors
    #[error("media URL is no longer servable")]
    StaleUrl,

    /// A response with a status in the retry set. Never escapes the
    /// downloader: exhausting the retry budget turns it into `DownloadFailed`.
    #[error("transient fetch error (HTTP {status})")]
    TransientFetch { status: u16 },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    // Subprocess errors
    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    // Delivery errors
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Operation on a key the cache does not hold (evicted or never resolved).
    #[error("no cache entry for {0}")]
    CacheInconsistency(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl MuninnError {
    /// Whether the error is worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, MuninnError::TransientFetch { .. })
    }

    /// Message safe to show to an end user.
    ///
    /// Selection and size-limit failures are terminal for the request and
    /// get a descriptive message; everything else is reported generically.
    pub fn user_message(&self) -> String {
        match self {
            MuninnError::LiveStreamUnsupported => "Live streams can't be downloaded.".to_string(),
            MuninnError::NotFound(_) => "This video is unavailable.".to_string(),
            MuninnError::InvalidReference(_) => "That doesn't look like a YouTube video.".to_string(),
            MuninnError::NoViableFormat(_) => "No downloadable format was found for this video.".to_string(),
            MuninnError::SizeExceeded { .. } => {
                "Video size exceeds the upload limit.".to_string()
            }
            MuninnError::StaleUrl => {
                "The video link expired before the download started, try again.".to_string()
            }
            _ => "Something went wrong while preparing this video.".to_string(),
        }
    }
}

impl From<std::io::Error> for MuninnError {
    fn from(err: std::io::Error) -> Self {
        MuninnError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for MuninnError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => MuninnError::DownloadFailed(format!("HTTP {status}")),
            None => MuninnError::DownloadFailed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MuninnError {
    fn from(err: serde_json::Error) -> Self {
        MuninnError::Metadata(err.to_string())
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
