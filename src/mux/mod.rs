//! Mux/transcode orchestration.
//!
//! Three ways to produce an artifact from a [`DeliveryPlan`]:
//!
//! - **simple**: stream the chosen full format as-is;
//! - **merge**: feed separate audio and video streams to ffmpeg on two
//!   descriptors and stream-copy them into `<temp_dir>/<video_id>.<container>`;
//! - **audio**: re-encode the audio stream to tagged mp3 on stdout.
//!
//! Merges are idempotent per video id: a finished output file is reused
//! until [`ArtifactProducer::release`] removes it.

mod ffmpeg;
mod progress;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use futures_util::future::join_all;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::download::{ChunkedDownloader, LivenessGuard};
use crate::traits::ArtifactProducer;
use crate::types::{
    Artifact, ArtifactKind, ArtifactMetadata, ByteStream, DeliveryPlan, EncodingFormat,
    ProgressReporter,
};
use crate::{MuninnError, Result};

pub use progress::{FfmpegProgress, ProgressParser, percent};

use ffmpeg::Encoder;

/// Orchestrator configuration.
///
/// ```rust
/// # use muninn::MuxConfig;
/// let config = MuxConfig::new()
///     .ffmpeg_path("/usr/local/bin/ffmpeg")
///     .temp_dir("/var/tmp/muninn")
///     .embed_cover(false);
/// ```
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// ffmpeg executable. Default: `ffmpeg` from `PATH`.
    pub ffmpeg_path: PathBuf,
    /// Directory for merge outputs and placeholders.
    pub temp_dir: PathBuf,
    /// Output container of merges. Default: `mp4`.
    pub container: String,
    /// Attach the video thumbnail to mp3 artifacts. Default: true.
    pub embed_cover: bool,
    /// Output frames buffered ahead of the consumer of a transcode.
    pub stream_buffer: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: std::env::temp_dir().join("muninn"),
            container: "mp4".to_string(),
            embed_cover: true,
            stream_buffer: 32,
        }
    }
}

impl MuxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn embed_cover(mut self, embed: bool) -> Self {
        self.embed_cover = embed;
        self
    }

    pub fn stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }
}

/// Produces audio and video artifacts with ffmpeg.
pub struct MuxOrchestrator {
    config: MuxConfig,
    downloader: ChunkedDownloader,
    guard: LivenessGuard,
    parser: Arc<dyn ProgressParser>,
}

impl MuxOrchestrator {
    pub fn new(config: MuxConfig, downloader: ChunkedDownloader, guard: LivenessGuard) -> Self {
        Self {
            config,
            downloader,
            guard,
            parser: Arc::new(FfmpegProgress),
        }
    }

    /// Replace the encoder progress parser.
    pub fn with_progress_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Final location of a merged video.
    pub fn merge_output(&self, video_id: &str) -> PathBuf {
        self.config
            .temp_dir
            .join(format!("{video_id}.{}", self.config.container))
    }

    // ------------------------------------------------------------------------
    // simple
    // ------------------------------------------------------------------------

    async fn stream_simple(
        &self,
        plan: &DeliveryPlan,
        format: &EncodingFormat,
        progress: ProgressReporter,
    ) -> Result<Artifact> {
        self.guard.ensure_live(&plan.video_id, format).await?;
        debug!(video_id = %plan.video_id, itag = format.itag, "streaming full format");
        let body = track_bytes(
            self.downloader.open_format(format),
            format.content_length,
            progress,
        );
        Ok(Artifact::from_stream(
            ArtifactMetadata::for_plan(plan, ArtifactKind::Video, &format.container),
            body,
        ))
    }

    // ------------------------------------------------------------------------
    // merge
    // ------------------------------------------------------------------------

    async fn merge(&self, plan: &DeliveryPlan, progress: ProgressReporter) -> Result<Artifact> {
        let video = plan.video_format.as_ref().ok_or_else(|| {
            MuninnError::MergeFailed(format!("plan for {} has no video-only format", plan.video_id))
        })?;
        let metadata = ArtifactMetadata::for_plan(plan, ArtifactKind::Video, &self.config.container);
        let output = self.merge_output(&plan.video_id);
        if fs::try_exists(&output).await.unwrap_or(false) {
            debug!(video_id = %plan.video_id, path = %output.display(), "reusing merged file");
            return read_artifact(metadata, &output).await;
        }

        self.guard
            .ensure_all_live(&plan.video_id, &[&plan.audio_format, video])
            .await?;
        fs::create_dir_all(&self.config.temp_dir).await?;

        let partial = output.with_extension(format!("{}.part", self.config.container));
        let args = ffmpeg::merge_args(&partial, &self.config.container);
        let started = Instant::now();
        let Encoder {
            mut child,
            inputs,
            stderr,
        } = ffmpeg::spawn(&self.config.ffmpeg_path, &args, 2, Stdio::null())?;

        // pipe:3 carries audio (input #0), pipe:4 video (input #1).
        let sources = [
            self.downloader.open_format(&plan.audio_format),
            self.downloader.open_format(video),
        ];
        let feeds = join_all(
            inputs
                .into_iter()
                .zip(sources)
                .map(|(pipe, source)| ffmpeg::feed(source, pipe)),
        );
        let log = ffmpeg::watch_log(stderr, self.parser.as_ref(), plan.duration_secs, &progress);
        let (fed, log, status) = tokio::join!(feeds, log, child.wait());

        if let Err(e) = ffmpeg::outcome(fed, status, log, MuninnError::MergeFailed) {
            warn!(video_id = %plan.video_id, error = %e, "merge failed");
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        fs::rename(&partial, &output).await?;
        info!(
            video_id = %plan.video_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merged video"
        );
        read_artifact(metadata, &output).await
    }

    // ------------------------------------------------------------------------
    // audio
    // ------------------------------------------------------------------------

    async fn transcode_audio(
        &self,
        plan: &DeliveryPlan,
        progress: ProgressReporter,
    ) -> Result<Artifact> {
        self.guard
            .ensure_live(&plan.video_id, &plan.audio_format)
            .await?;

        let cover = if self.config.embed_cover {
            plan.thumbnail_url.as_deref()
        } else {
            None
        };
        let args = ffmpeg::transcode_args(&plan.title, &plan.author, cover);
        let Encoder {
            mut child,
            mut inputs,
            stderr,
        } = ffmpeg::spawn(&self.config.ffmpeg_path, &args, 1, Stdio::piped())?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MuninnError::TranscodeFailed("encoder stdout not captured".into()))?;
        let pipe = inputs
            .pop()
            .ok_or_else(|| MuninnError::TranscodeFailed("encoder input not created".into()))?;

        let source = self.downloader.open_format(&plan.audio_format);
        let parser = Arc::clone(&self.parser);
        let duration = plan.duration_secs;
        let video_id = plan.video_id.clone();
        let (tx, rx) = mpsc::channel(self.config.stream_buffer);

        tokio::spawn(async move {
            let forward = async {
                loop {
                    let mut buf = BytesMut::with_capacity(64 * 1024);
                    match stdout.read_buf(&mut buf).await {
                        Ok(0) => return true,
                        Ok(_) => {
                            if tx.send(Ok(buf.freeze())).await.is_err() {
                                return false;
                            }
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Err(MuninnError::TranscodeFailed(format!(
                                    "reading encoder output: {e}"
                                ))))
                                .await;
                            return false;
                        }
                    }
                }
            };
            let (fed, log, finished) = tokio::join!(
                ffmpeg::feed(source, pipe),
                ffmpeg::watch_log(stderr, parser.as_ref(), duration, &progress),
                forward
            );
            if !finished {
                debug!(video_id = %video_id, "transcode output abandoned");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return;
            }
            let status = child.wait().await;
            if let Err(e) = ffmpeg::outcome(vec![fed], status, log, MuninnError::TranscodeFailed) {
                warn!(video_id = %video_id, error = %e, "audio transcode failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(Artifact::from_stream(
            ArtifactMetadata::for_plan(plan, ArtifactKind::Audio, "mp3"),
            Box::pin(ReceiverStream::new(rx)),
        ))
    }
}

#[async_trait]
impl ArtifactProducer for MuxOrchestrator {
    async fn produce(
        &self,
        plan: &DeliveryPlan,
        kind: ArtifactKind,
        progress: ProgressReporter,
    ) -> Result<Artifact> {
        match kind {
            ArtifactKind::Audio => self.transcode_audio(plan, progress).await,
            ArtifactKind::Video if plan.is_exceeds => {
                Err(MuninnError::NoViableFormat(plan.video_id.clone()))
            }
            ArtifactKind::Video if plan.choose_simple => {
                let simple = plan.simple_format.as_ref().ok_or_else(|| {
                    MuninnError::NoViableFormat(plan.video_id.clone())
                })?;
                self.stream_simple(plan, simple, progress).await
            }
            ArtifactKind::Video => self.merge(plan, progress).await,
        }
    }

    async fn placeholder(&self, kind: ArtifactKind) -> Result<Artifact> {
        let metadata = ArtifactMetadata::placeholder(kind);
        fs::create_dir_all(&self.config.temp_dir).await?;
        let path = self.config.temp_dir.join(&metadata.file_name);
        let args = ffmpeg::placeholder_args(kind, &path);

        let Encoder {
            mut child, stderr, ..
        } = ffmpeg::spawn(&self.config.ffmpeg_path, &args, 0, Stdio::null())?;
        let noop = ProgressReporter::noop();
        let (log, status) = tokio::join!(
            ffmpeg::watch_log(stderr, self.parser.as_ref(), 0.0, &noop),
            child.wait()
        );
        let rendered = ffmpeg::outcome(Vec::new(), status, log, MuninnError::TranscodeFailed);
        let artifact = match rendered {
            Ok(()) => read_artifact(metadata, &path).await,
            Err(e) => Err(e),
        };
        let _ = fs::remove_file(&path).await;
        debug!(kind = %kind, ok = artifact.is_ok(), "rendered placeholder");
        artifact
    }

    async fn release(&self, plan: &DeliveryPlan, kind: ArtifactKind) {
        if kind != ArtifactKind::Video || !plan.needs_merge() {
            return;
        }
        let output = self.merge_output(&plan.video_id);
        match fs::remove_file(&output).await {
            Ok(()) => debug!(video_id = %plan.video_id, "removed merged file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(video_id = %plan.video_id, error = %e, "failed to remove merged file"),
        }
    }
}

/// Read a finished output file into an artifact.
async fn read_artifact(metadata: ArtifactMetadata, path: &Path) -> Result<Artifact> {
    let bytes = fs::read(path).await?;
    Ok(Artifact::from_bytes(metadata, bytes))
}

/// Report download progress as a share of `total` bytes.
fn track_bytes(body: ByteStream, total: u64, progress: ProgressReporter) -> ByteStream {
    if total == 0 {
        return body;
    }
    let mut received = 0u64;
    Box::pin(body.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            received += bytes.len() as u64;
            progress.report(percent(received as f64, total as f64));
        }
        chunk
    }))
}
