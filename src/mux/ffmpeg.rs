//! ffmpeg invocation: argument sets, piped inputs and log handling.
//!
//! Inputs are fed through dedicated descriptors starting at 3 (`pipe:3`,
//! `pipe:4`, ...), so stdout stays free for streamed output and stderr
//! carries the `-progress` block together with error lines.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::progress::{ProgressParser, is_progress_line, percent};
use crate::types::{ArtifactKind, ByteStream, ProgressReporter};
use crate::{MuninnError, Result};

const GLOBAL_ARGS: [&str; 4] = ["-hide_banner", "-v", "error", "-y"];

/// Progress goes to stderr alongside error lines.
const PROGRESS_ARGS: [&str; 2] = ["-progress", "pipe:2"];

/// Descriptor of the first piped input.
pub(crate) const FIRST_INPUT_FD: i32 = 3;

/// Most piped inputs a single invocation may take.
pub(crate) const MAX_INPUTS: usize = 4;

/// Log lines kept for error messages.
const LOG_TAIL: usize = 6;

fn base_args() -> Vec<String> {
    GLOBAL_ARGS
        .iter()
        .chain(PROGRESS_ARGS.iter())
        .map(|s| s.to_string())
        .collect()
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// ffmpeg muxer name for a container tag.
pub(crate) fn muxer_for(container: &str) -> &str {
    match container {
        "mkv" => "matroska",
        other => other,
    }
}

/// Stream-copy merge of audio (`pipe:3`, input #0) and video (`pipe:4`,
/// input #1) into `output`.
pub(crate) fn merge_args(output: &Path, container: &str) -> Vec<String> {
    let mut args = base_args();
    push(
        &mut args,
        &[
            "-i", "pipe:3", "-i", "pipe:4", "-c:v", "copy", "-c:a", "copy", "-map", "1:v", "-map",
            "0:a", "-f",
        ],
    );
    args.push(muxer_for(container).to_string());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Re-encode `pipe:3` to mp3 on stdout with title/artist tags and, when
/// `cover` is set, the image at that location as attached picture.
pub(crate) fn transcode_args(title: &str, artist: &str, cover: Option<&str>) -> Vec<String> {
    let mut args = base_args();
    push(&mut args, &["-i", "pipe:3"]);
    if let Some(cover) = cover {
        push(&mut args, &["-i", cover]);
    }
    push(&mut args, &["-map", "0:a"]);
    if cover.is_some() {
        push(
            &mut args,
            &[
                "-map",
                "1:v",
                "-c:v",
                "mjpeg",
                "-disposition:v",
                "attached_pic",
            ],
        );
    }
    args.push("-metadata".into());
    args.push(format!("title={}", sanitize_tag(title)));
    args.push("-metadata".into());
    args.push(format!("artist={}", sanitize_tag(artist)));
    push(
        &mut args,
        &["-c:a", "libmp3lame", "-id3v2_version", "3", "-f", "mp3", "pipe:1"],
    );
    args
}

/// Five seconds of black 640x480 video with silent stereo audio.
pub(crate) fn placeholder_args(kind: ArtifactKind, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = GLOBAL_ARGS.iter().map(|s| s.to_string()).collect();
    if kind == ArtifactKind::Video {
        push(
            &mut args,
            &["-f", "lavfi", "-t", "5", "-i", "color=c=black:s=640x480"],
        );
    }
    push(
        &mut args,
        &[
            "-f",
            "lavfi",
            "-t",
            "5",
            "-i",
            "anullsrc=channel_layout=stereo:sample_rate=44100",
        ],
    );
    match kind {
        ArtifactKind::Video => push(
            &mut args,
            &[
                "-c:v", "libx264", "-tune", "stillimage", "-pix_fmt", "yuv420p", "-c:a", "aac",
                "-metadata", "title=Video", "-f", "mp4",
            ],
        ),
        ArtifactKind::Audio => push(
            &mut args,
            &["-c:a", "libmp3lame", "-metadata", "title=Audio", "-f", "mp3"],
        ),
    }
    args.push(output.to_string_lossy().into_owned());
    args
}

fn sanitize_tag(value: &str) -> String {
    value.replace(['"', '\n', '\r'], "")
}

// ============================================================================
// Process
// ============================================================================

/// Write end of a piped input.
pub(crate) type InputPipe = Pin<Box<dyn AsyncWrite + Send>>;

/// A running encoder.
pub(crate) struct Encoder {
    pub child: Child,
    /// Input pipes in descriptor order (`pipe:3` first).
    pub inputs: Vec<InputPipe>,
    pub stderr: ChildStderr,
}

/// Spawn `program` with `inputs` piped input descriptors.
#[cfg(unix)]
pub(crate) fn spawn(program: &Path, args: &[String], inputs: usize, stdout: Stdio) -> Result<Encoder> {
    use std::os::fd::{AsRawFd, OwnedFd};
    use tokio::net::unix::pipe;

    if inputs > MAX_INPUTS {
        return Err(MuninnError::Configuration(format!(
            "at most {MAX_INPUTS} piped inputs are supported"
        )));
    }

    let mut senders: Vec<InputPipe> = Vec::with_capacity(inputs);
    let mut read_ends: Vec<OwnedFd> = Vec::with_capacity(inputs);
    for _ in 0..inputs {
        let (tx, rx) = pipe::pipe()?;
        read_ends.push(rx.into_blocking_fd()?);
        senders.push(Box::pin(tx));
    }
    let sources: Vec<i32> = read_ends.iter().map(AsRawFd::as_raw_fd).collect();

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: the hook only calls fcntl, dup2 and close, which are
    // async-signal-safe, and does not allocate.
    unsafe {
        command.pre_exec(move || {
            let mut high = [-1; MAX_INPUTS];
            // Move every source above the target range first so a source
            // sitting on 3 or 4 is not clobbered by an earlier dup2.
            for (slot, fd) in high.iter_mut().zip(&sources) {
                *slot = libc::fcntl(*fd, libc::F_DUPFD, 10);
                if *slot < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            for (i, fd) in high.iter().take(sources.len()).enumerate() {
                if libc::dup2(*fd, FIRST_INPUT_FD + i as i32) < 0 {
                    return Err(io::Error::last_os_error());
                }
                // The copy sits at 10 or above, never on a target descriptor.
                libc::close(*fd);
            }
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|e| {
        MuninnError::Configuration(format!("failed to run {}: {e}", program.display()))
    })?;
    drop(read_ends);
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| MuninnError::Io("encoder stderr not captured".to_string()))?;
    Ok(Encoder {
        child,
        inputs: senders,
        stderr,
    })
}

#[cfg(not(unix))]
pub(crate) fn spawn(_program: &Path, _args: &[String], _inputs: usize, _stdout: Stdio) -> Result<Encoder> {
    Err(MuninnError::Unsupported("encoder input pipes require a unix platform"))
}

/// Why feeding an input stopped early.
#[derive(Debug)]
pub(crate) enum FeedError {
    /// The source stream failed.
    Source(MuninnError),
    /// The encoder closed its end.
    Closed(io::Error),
}

/// Copy `source` into an encoder input and close it.
pub(crate) async fn feed(mut source: ByteStream, mut sink: InputPipe) -> std::result::Result<(), FeedError> {
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(FeedError::Source)?;
        sink.write_all(&chunk).await.map_err(FeedError::Closed)?;
    }
    sink.shutdown().await.map_err(FeedError::Closed)
}

/// Read the encoder's stderr to the end, publishing progress and keeping the
/// last log lines for error messages.
pub(crate) async fn watch_log(
    stderr: impl AsyncRead + Unpin,
    parser: &dyn ProgressParser,
    duration_secs: f64,
    progress: &ProgressReporter,
) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(LOG_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(secs) = parser.parse_line(&line) {
            progress.report(percent(secs, duration_secs));
        } else if !is_progress_line(&line) && !line.trim().is_empty() {
            if tail.len() == LOG_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    Vec::from(tail).join("; ")
}

/// Combine feed results, exit status and log into one outcome.
///
/// A failed source wins: the encoder error is only its consequence.
pub(crate) fn outcome(
    fed: Vec<std::result::Result<(), FeedError>>,
    status: io::Result<ExitStatus>,
    log: String,
    fail: fn(String) -> MuninnError,
) -> Result<()> {
    let mut closed = None;
    for result in fed {
        match result {
            Err(FeedError::Source(e)) => return Err(e),
            Err(FeedError::Closed(e)) => closed = Some(e),
            Ok(()) => {}
        }
    }
    let status = status.map_err(|e| fail(format!("waiting for encoder: {e}")))?;
    if !status.success() {
        return Err(fail(if log.is_empty() {
            format!("encoder exited with {status}")
        } else {
            format!("encoder exited with {status}: {log}")
        }));
    }
    if let Some(e) = closed {
        return Err(fail(format!("encoder closed its input: {e}")));
    }
    Ok(())
}
