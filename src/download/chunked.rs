//! Resilient chunked HTTP download.
//!
//! Signed media URLs throttle long-lived connections, so large streams are
//! fetched as a sequence of ranged requests (`&range=start-end`), each
//! retried independently. A producer task pushes the bytes into a bounded
//! channel; the consumer sees one continuous [`ByteStream`].
//!
//! Errors never surface from [`ChunkedDownloader::open`] itself: a failed
//! request ends the stream with an `Err` item, and nothing is retried in
//! the middle of a chunk body.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, Url};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::retry::{RetryConfig, with_retry};
use crate::telemetry;
use crate::types::{ByteStream, EncodingFormat};
use crate::{MuninnError, Result};

/// Default size of one ranged request: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Number of body frames buffered between the fetch task and the consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Downloader configuration.
///
/// ```rust
/// # use muninn::DownloadConfig;
/// # use std::time::Duration;
/// let config = DownloadConfig::new()
///     .chunk_size(4 * 1024 * 1024)
///     .request_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Bytes per ranged request; `0` disables chunking. Default: 10 MiB.
    pub chunk_size: u64,
    /// Time allowed for a response to arrive (headers, not body). Default: 10s.
    pub request_timeout: Duration,
    /// Retry policy applied to every request.
    pub retry: RetryConfig,
    /// Body frames buffered ahead of the consumer. Default: 64.
    pub stream_buffer: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }
}

/// Per-call options for [`ChunkedDownloader::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Fetch the whole resource with one unranged GET.
    pub single_request: bool,
}

impl OpenOptions {
    /// Options suited to `format`: one request for small full streams.
    pub fn for_format(format: &EncodingFormat) -> Self {
        Self {
            single_request: format.prefers_single_request(),
        }
    }
}

/// HTTP downloader producing byte streams.
#[derive(Debug, Clone)]
pub struct ChunkedDownloader {
    client: Client,
    config: DownloadConfig,
}

impl ChunkedDownloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    /// Use a preconfigured client (custom headers, proxies).
    pub fn with_client(client: Client, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Open `format` with the options its shape calls for.
    pub fn open_format(&self, format: &EncodingFormat) -> ByteStream {
        self.open(&format.url(), format.content_length, OpenOptions::for_format(format))
    }

    /// Start downloading `url` and return the byte stream.
    ///
    /// `content_length` decides where the last ranged request starts; pass
    /// `0` when unknown to fetch everything in one open-ended request.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (spawns the fetch task).
    pub fn open(&self, url: &str, content_length: u64, opts: OpenOptions) -> ByteStream {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer);
        let transfer = Transfer {
            client: self.client.clone(),
            config: self.config.clone(),
            url: url.to_string(),
            content_length,
            chunk_size: if opts.single_request {
                0
            } else {
                self.config.chunk_size
            },
        };

        tokio::spawn(async move {
            if let Err(e) = transfer.run(&tx).await {
                warn!(error = %e, "download failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// State of one download.
struct Transfer {
    client: Client,
    config: DownloadConfig,
    url: String,
    content_length: u64,
    chunk_size: u64,
}

type Sink = mpsc::Sender<Result<bytes::Bytes>>;

impl Transfer {
    async fn run(&self, tx: &Sink) -> Result<()> {
        if self.chunk_size == 0 {
            let response = self.request(self.url.clone()).await?;
            self.forward(response, tx).await?;
            return Ok(());
        }

        let mut start = 0u64;
        loop {
            let last = start + self.chunk_size >= self.content_length;
            let range = if last {
                format!("{start}-")
            } else {
                format!("{start}-{}", start + self.chunk_size - 1)
            };
            debug!(range = %range, content_length = self.content_length, "requesting chunk");
            let response = self.request(ranged_url(&self.url, &range)?).await?;
            if !self.forward(response, tx).await? || last {
                return Ok(());
            }
            start += self.chunk_size;
        }
    }

    /// Issue one GET with retries.
    async fn request(&self, url: String) -> Result<Response> {
        let retry = &self.config.retry;
        with_retry(retry, "media_get", || async {
            let response = tokio::time::timeout(
                self.config.request_timeout,
                self.client.get(url.as_str()).send(),
            )
            .await
            .map_err(|_| MuninnError::DownloadFailed("request timed out".to_string()))??;

            let status = response.status();
            if status.is_success() {
                Ok(response)
            } else if retry.is_retryable(status.as_u16()) {
                Err(MuninnError::TransientFetch {
                    status: status.as_u16(),
                })
            } else {
                Err(MuninnError::DownloadFailed(format!("HTTP {status}")))
            }
        })
        .await
    }

    /// Pipe a response body into the channel without closing it.
    ///
    /// Returns `false` when the consumer went away.
    async fn forward(&self, response: Response, tx: &Sink) -> Result<bool> {
        let mut body = response.bytes_stream();
        while let Some(frame) = body.next().await {
            let frame =
                frame.map_err(|e| MuninnError::DownloadFailed(format!("body read failed: {e}")))?;
            metrics::counter!(telemetry::DOWNLOADED_BYTES_TOTAL).increment(frame.len() as u64);
            if tx.send(Ok(frame)).await.is_err() {
                debug!("download consumer dropped");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Append the platform's `range` query parameter.
fn ranged_url(url: &str, range: &str) -> Result<String> {
    let mut url = Url::parse(url)
        .map_err(|e| MuninnError::DownloadFailed(format!("invalid media URL: {e}")))?;
    url.query_pairs_mut().append_pair("range", range);
    Ok(url.into())
}
