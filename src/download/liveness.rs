//! URL liveness guard.
//!
//! Resolved stream URLs are short-lived signed links. Before a download
//! starts, each URL gets a HEAD probe; a stale URL blocks the caller until a
//! replacement arrives (from the [`UrlRefresher`] or any other writer of the
//! format's URL) or the hard timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use tracing::{debug, warn};

use crate::resolver::UrlRefresher;
use crate::telemetry;
use crate::types::EncodingFormat;
use crate::{MuninnError, Result};

/// Liveness guard configuration.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Hard limit on waiting for a fresh URL. Default: 15s.
    pub refresh_timeout: Duration,
    /// Timeout of the HEAD probe itself. Default: 10s.
    pub probe_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl LivenessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Verifies stream URLs before use.
#[derive(Clone)]
pub struct LivenessGuard {
    client: Client,
    config: LivenessConfig,
    refresher: Option<Arc<dyn UrlRefresher>>,
}

impl LivenessGuard {
    pub fn new(client: Client, config: LivenessConfig) -> Self {
        Self {
            client,
            config,
            refresher: None,
        }
    }

    /// Re-materialize stale URLs through `refresher`.
    pub fn with_refresher(mut self, refresher: Arc<dyn UrlRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Cheap existence check: HEAD with a short timeout, 2xx means live.
    pub async fn probe(&self, url: &str) -> bool {
        let request = self
            .client
            .head(url)
            .timeout(self.config.probe_timeout)
            .send();
        match request.await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }

    /// Ensure a single format's URL is servable.
    pub async fn ensure_live(&self, video_id: &str, format: &EncodingFormat) -> Result<()> {
        self.ensure_all_live(video_id, &[format]).await
    }

    /// Ensure every format's URL is servable, refreshing stale ones in one
    /// batch.
    ///
    /// Fails with `StaleUrl` when no replacement arrives within the refresh
    /// timeout or the refresher fails.
    pub async fn ensure_all_live(&self, video_id: &str, formats: &[&EncodingFormat]) -> Result<()> {
        let probes = join_all(formats.iter().map(|f| async move {
            let url = f.url();
            (*f, self.probe(&url).await)
        }))
        .await;
        let stale: Vec<&EncodingFormat> = probes
            .into_iter()
            .filter_map(|(f, live)| (!live).then_some(f))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        metrics::counter!(telemetry::STALE_URLS_TOTAL).increment(stale.len() as u64);
        warn!(
            video_id,
            itags = ?stale.iter().map(|f| f.itag).collect::<Vec<_>>(),
            "stale media URLs, waiting for refresh"
        );

        // Subscribe before the refresher runs so its write is not missed.
        let waiters: Vec<_> = stale.iter().map(|f| f.media_url().refreshed()).collect();
        let refresh = async {
            match &self.refresher {
                Some(refresher) => self.refresh(refresher.as_ref(), video_id, &stale).await,
                None => {
                    for url in join_all(waiters).await {
                        if url.is_empty() {
                            return Err(MuninnError::StaleUrl);
                        }
                    }
                    Ok(())
                }
            }
        };

        match tokio::time::timeout(self.config.refresh_timeout, refresh).await {
            Ok(result) => result,
            Err(_) => {
                warn!(video_id, "timed out waiting for a fresh URL");
                Err(MuninnError::StaleUrl)
            }
        }
    }

    async fn refresh(
        &self,
        refresher: &dyn UrlRefresher,
        video_id: &str,
        stale: &[&EncodingFormat],
    ) -> Result<()> {
        let itags: Vec<u32> = stale.iter().map(|f| f.itag).collect();
        let urls = refresher.refresh_urls(video_id, &itags).await.map_err(|e| {
            warn!(video_id, error = %e, "URL refresh failed");
            MuninnError::StaleUrl
        })?;
        for (format, url) in stale.iter().zip(urls) {
            if url.is_empty() {
                return Err(MuninnError::StaleUrl);
            }
            format.set_url(url);
        }
        debug!(video_id, refreshed = stale.len(), "media URLs refreshed");
        Ok(())
    }
}
