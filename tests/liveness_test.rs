//! Tests for URL liveness checks and stale-URL refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use muninn::{
    EncodingFormat, LivenessConfig, LivenessGuard, MuninnError, Quality, Result, UrlRefresher,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Refresher answering with fixed URLs.
struct FixedRefresher {
    urls: Vec<String>,
    calls: AtomicU32,
}

impl FixedRefresher {
    fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl UrlRefresher for FixedRefresher {
    async fn refresh_urls(&self, _video_id: &str, itags: &[u32]) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        assert_eq!(itags.len(), self.urls.len());
        Ok(self.urls.clone())
    }
}

struct FailingRefresher;

#[async_trait]
impl UrlRefresher for FailingRefresher {
    async fn refresh_urls(&self, video_id: &str, _itags: &[u32]) -> Result<Vec<String>> {
        Err(MuninnError::Metadata(format!("yt-dlp failed for {video_id}")))
    }
}

fn guard(refresh_timeout: Duration) -> LivenessGuard {
    LivenessGuard::new(
        reqwest::Client::new(),
        LivenessConfig::new()
            .refresh_timeout(refresh_timeout)
            .probe_timeout(Duration::from_secs(2)),
    )
}

async fn server_with(status_by_path: &[(&str, u16)]) -> MockServer {
    let server = MockServer::start().await;
    for (p, status) in status_by_path {
        Mock::given(method("HEAD"))
            .and(path(*p))
            .respond_with(ResponseTemplate::new(*status))
            .mount(&server)
            .await;
    }
    server
}

#[tokio::test]
async fn live_urls_pass_without_refresh() {
    let server = server_with(&[("/audio", 200), ("/video", 200)]).await;
    let refresher = Arc::new(FixedRefresher::new(vec![]));
    let guard = guard(Duration::from_secs(1)).with_refresher(refresher.clone());

    let audio = EncodingFormat::new(140, Quality::Tiny, format!("{}/audio", server.uri())).with_audio();
    let video = EncodingFormat::new(137, Quality::Hd1080, format!("{}/video", server.uri())).with_video();
    guard
        .ensure_all_live("dQw4w9WgXcQ", &[&audio, &video])
        .await
        .unwrap();
    assert_eq!(refresher.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn stale_urls_are_refreshed_in_one_batch() {
    let server = server_with(&[("/audio", 200), ("/old-video", 403)]).await;
    let fresh = format!("{}/new-video", server.uri());
    let refresher = Arc::new(FixedRefresher::new(vec![fresh.clone()]));
    let guard = guard(Duration::from_secs(1)).with_refresher(refresher.clone());

    let audio = EncodingFormat::new(140, Quality::Tiny, format!("{}/audio", server.uri())).with_audio();
    let video =
        EncodingFormat::new(137, Quality::Hd1080, format!("{}/old-video", server.uri())).with_video();
    let shared = video.clone();

    guard
        .ensure_all_live("dQw4w9WgXcQ", &[&audio, &video])
        .await
        .unwrap();
    assert_eq!(refresher.calls.load(Ordering::Relaxed), 1);
    assert_eq!(video.url(), fresh);
    // Clones share the URL cell.
    assert_eq!(shared.url(), fresh);
}

#[tokio::test]
async fn stale_url_waits_for_another_writer() {
    let server = server_with(&[("/gone", 410)]).await;
    let guard = guard(Duration::from_secs(2));
    let format = EncodingFormat::new(140, Quality::Tiny, format!("{}/gone", server.uri())).with_audio();

    let writer = format.clone();
    let fresh = format!("{}/fresh", server.uri());
    let expected = fresh.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.set_url(fresh);
    });

    guard.ensure_live("dQw4w9WgXcQ", &format).await.unwrap();
    assert_eq!(format.url(), expected);
}

#[tokio::test]
async fn no_fresh_url_within_timeout_is_stale() {
    let server = server_with(&[("/gone", 403)]).await;
    let guard = guard(Duration::from_millis(100));
    let format = EncodingFormat::new(140, Quality::Tiny, format!("{}/gone", server.uri())).with_audio();

    assert_eq!(
        guard.ensure_live("dQw4w9WgXcQ", &format).await,
        Err(MuninnError::StaleUrl)
    );
}

#[tokio::test]
async fn empty_refreshed_url_is_stale() {
    let server = server_with(&[("/gone", 403)]).await;
    let guard = guard(Duration::from_secs(1))
        .with_refresher(Arc::new(FixedRefresher::new(vec![String::new()])));
    let format = EncodingFormat::new(140, Quality::Tiny, format!("{}/gone", server.uri())).with_audio();

    assert_eq!(
        guard.ensure_live("dQw4w9WgXcQ", &format).await,
        Err(MuninnError::StaleUrl)
    );
}

#[tokio::test]
async fn refresher_error_is_stale() {
    let server = server_with(&[("/gone", 403)]).await;
    let guard = guard(Duration::from_secs(1)).with_refresher(Arc::new(FailingRefresher));
    let format = EncodingFormat::new(140, Quality::Tiny, format!("{}/gone", server.uri())).with_audio();

    assert_eq!(
        guard.ensure_live("dQw4w9WgXcQ", &format).await,
        Err(MuninnError::StaleUrl)
    );
}

#[tokio::test]
async fn probe_reports_status() {
    let server = server_with(&[("/ok", 200), ("/forbidden", 403)]).await;
    let guard = guard(Duration::from_secs(1));
    assert!(guard.probe(&format!("{}/ok", server.uri())).await);
    assert!(!guard.probe(&format!("{}/forbidden", server.uri())).await);
}
