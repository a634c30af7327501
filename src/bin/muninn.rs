//! muninn: fetch size-bounded audio and video artifacts from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use muninn::{ArtifactKind, Config, DirectorySink, MediaCache, MediaEvent, bytes_to_human_size};

/// Muninn CLI
#[derive(Parser)]
#[command(name = "muninn")]
#[command(version = muninn::PKG_VERSION)]
#[command(about = "Size-bounded video acquisition")]
struct Args {
    /// Config file (default: ~/.muninn/config.toml, then /etc/muninn/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg: Option<PathBuf>,

    /// yt-dlp executable
    #[arg(long, env = "YTDLP_PATH")]
    yt_dlp: Option<PathBuf>,

    /// Directory for merge outputs
    #[arg(long, env = "TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Directory receiving finished artifacts
    #[arg(short, long, default_value = "downloads")]
    out: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a video and show the chosen streams
    Plan {
        /// Video id or URL
        reference: String,
    },

    /// Produce an artifact and store it in the output directory
    Fetch {
        /// Video id or URL
        reference: String,
        /// Artifact kind (audio or video)
        #[arg(short, long, default_value = "audio")]
        kind: ArtifactKind,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("muninn=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(ffmpeg) = args.ffmpeg {
        config.mux.ffmpeg_path = ffmpeg;
    }
    if let Some(dir) = args.temp_dir {
        config.mux.temp_dir = Some(dir);
    }
    if let Some(yt_dlp) = args.yt_dlp {
        config.ytdlp.path = yt_dlp;
    }

    let mut builder = config
        .apply(MediaCache::builder())
        .sink(Arc::new(DirectorySink::new(&args.out)));
    builder = if config.ytdlp.refresh_urls {
        builder.yt_dlp(config.ytdlp.path.clone())
    } else {
        builder.metadata_source(Arc::new(muninn::YtDlpSource::new(config.ytdlp.path.clone())))
    };
    let cache = builder.build()?;

    match args.command {
        Command::Plan { reference } => {
            let entry = cache.get(&reference).await?;
            let plan = &entry.plan;
            println!("{} ({})", plan.title, plan.video_id);
            println!("author: {}", plan.author);
            println!("duration: {:.0}s", plan.duration_secs);
            println!(
                "audio: itag {} ({})",
                plan.audio_format.itag,
                bytes_to_human_size(plan.audio_format.content_length)
            );
            if plan.is_exceeds {
                println!("video: exceeds the size limit");
            } else if let Some(simple) = plan.simple_format.as_ref().filter(|_| plan.choose_simple) {
                println!(
                    "video: itag {} {} ({})",
                    simple.itag,
                    simple.quality.as_str(),
                    bytes_to_human_size(simple.content_length)
                );
            } else if let Some(video) = &plan.video_format {
                println!(
                    "video: itag {} {} + audio ({})",
                    video.itag,
                    video.quality.as_str(),
                    bytes_to_human_size(video.content_length + plan.audio_format.content_length)
                );
            }
        }

        Command::Fetch { reference, kind } => {
            let entry = cache.get(&reference).await?;
            let video_id = entry.video_id().to_string();
            let mut events = cache.subscribe(&video_id, kind)?;

            let production = {
                let cache = cache.clone();
                let video_id = video_id.clone();
                tokio::spawn(async move { cache.get_artifact(&video_id, kind, false).await })
            };

            while let Some(event) = events.recv().await {
                match event {
                    MediaEvent::Started => eprintln!("{kind} for {video_id} started"),
                    MediaEvent::Progress(percent) => eprint!("\r{percent:5.1}%"),
                    MediaEvent::Succeeded(_) | MediaEvent::Failed(_) => {
                        eprintln!();
                        break;
                    }
                }
            }

            let path = production.await??;
            println!("{path}");
        }
    }

    Ok(())
}
