//! Builder for configuring media cache instances

use std::sync::Arc;

use reqwest::Client;

use super::config::CacheConfig;
use super::coordinator::MediaCache;
use crate::download::{ChunkedDownloader, DownloadConfig, LivenessConfig, LivenessGuard};
use crate::mux::{MuxConfig, MuxOrchestrator};
use crate::resolver::{FormatResolver, MetadataSource, SelectionConfig, UrlRefresher};
use crate::traits::{ArtifactProducer, ArtifactSink};
use crate::{MuninnError, Result};

/// Builder for [`MediaCache`].
///
/// A metadata source and a sink are required. Without an explicit
/// producer, a [`MuxOrchestrator`] is assembled from the download,
/// liveness and mux configs.
#[derive(Default)]
pub struct MediaCacheBuilder {
    metadata_source: Option<Arc<dyn MetadataSource>>,
    url_refresher: Option<Arc<dyn UrlRefresher>>,
    sink: Option<Arc<dyn ArtifactSink>>,
    producer: Option<Arc<dyn ArtifactProducer>>,
    http_client: Option<Client>,
    selection: SelectionConfig,
    download: DownloadConfig,
    liveness: LivenessConfig,
    mux: MuxConfig,
    cache: CacheConfig,
}

impl MediaCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata_source = Some(source);
        self
    }

    /// Fallback used when a stream URL fails its liveness probe.
    pub fn url_refresher(mut self, refresher: Arc<dyn UrlRefresher>) -> Self {
        self.url_refresher = Some(refresher);
        self
    }

    /// Use `yt-dlp` at `program` as metadata source and URL refresher.
    #[cfg(feature = "ytdlp")]
    pub fn yt_dlp(self, program: impl Into<std::path::PathBuf>) -> Self {
        let source = Arc::new(crate::resolver::ytdlp::YtDlpSource::new(program));
        self.metadata_source(source.clone()).url_refresher(source)
    }

    pub fn sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the ffmpeg-based producer.
    pub fn producer(mut self, producer: Arc<dyn ArtifactProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// HTTP client shared by downloads and liveness probes.
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn selection(mut self, config: SelectionConfig) -> Self {
        self.selection = config;
        self
    }

    pub fn download(mut self, config: DownloadConfig) -> Self {
        self.download = config;
        self
    }

    pub fn liveness(mut self, config: LivenessConfig) -> Self {
        self.liveness = config;
        self
    }

    /// Merge output uses the container of the selection config.
    pub fn mux(mut self, config: MuxConfig) -> Self {
        self.mux = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Build the cache.
    ///
    /// Fails with `Configuration` when a required collaborator is missing
    /// or a limit is zero.
    pub fn build(self) -> Result<MediaCache> {
        let source = self
            .metadata_source
            .ok_or_else(|| MuninnError::Configuration("no metadata source configured".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| MuninnError::Configuration("no artifact sink configured".into()))?;
        if self.selection.max_artifact_bytes == 0 {
            return Err(MuninnError::Configuration(
                "max artifact size must be positive".into(),
            ));
        }

        let producer = match self.producer {
            Some(producer) => producer,
            None => {
                let client = self.http_client.unwrap_or_default();
                let downloader = ChunkedDownloader::with_client(client.clone(), self.download);
                let mut guard = LivenessGuard::new(client, self.liveness);
                if let Some(refresher) = self.url_refresher {
                    guard = guard.with_refresher(refresher);
                }
                let mux = self.mux.container(self.selection.container.clone());
                Arc::new(MuxOrchestrator::new(mux, downloader, guard)) as Arc<dyn ArtifactProducer>
            }
        };

        Ok(MediaCache::from_parts(
            FormatResolver::new(source, self.selection),
            producer,
            sink,
            self.cache,
        ))
    }
}
