mod frames;

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use clap::{Parser, Subcommand};
use motion_audio_core::{
    hint::TimedHint, run_tracking, AppConfig, AudioOutput, BitmapSource, DirectiveApplied,
    MemorySink, MotionAudioError, ReplayHints, Result, SceneHint, TrackingSession,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use frames::{BouncingSquare, DirectoryFrames};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Render {
            frames,
            fps,
            width,
            height,
            hints,
            output,
            directives,
        } => {
            let mut source = DirectoryFrames::open(&frames, fps, width, height)?;
            tracing::info!(duration_secs = source.duration_secs(), "rendering clip");
            let hints = hints.as_deref().map(|path| ReplayHints::load(path)).transpose()?;
            run(config, &mut source, hints.as_ref(), &output, directives.as_deref()).await
        }
        Commands::Demo {
            seconds,
            output,
            directives,
        } => {
            let mut source = BouncingSquare::new(seconds);
            let hints = demo_hints(seconds)?;
            run(config, &mut source, Some(&hints), &output, directives.as_deref()).await
        }
    }
}

async fn run<S: BitmapSource>(
    config: AppConfig,
    source: &mut S,
    hints: Option<&ReplayHints>,
    output: &Path,
    directives: Option<&Path>,
) -> Result<()> {
    let sample_rate = config.audio.sample_rate;
    let sink = MemorySink::new();
    let audio = AudioOutput::new(&config.audio, sink.clone())?;
    let mut session = TrackingSession::new(config, audio);

    let log = Arc::new(Mutex::new(Vec::new()));
    let listener_log = log.clone();
    session.on_directive_applied(move |applied: &DirectiveApplied| {
        if let Some(change) = applied.directive.tempo_change() {
            tracing::info!(from = change.from, to = change.to, "tempo change");
        }
        if let Ok(mut log) = listener_log.lock() {
            log.push(applied.clone());
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let summary = run_tracking(&mut session, source, hints, cancel).await?;
    let digest = session.scene_digest();
    tracing::info!(
        ticks = summary.ticks,
        directives = summary.directives,
        mood = digest.dominant_mood().unwrap_or("unknown"),
        scene = digest.dominant_scene().unwrap_or("unknown"),
        "session summary"
    );
    session.shutdown()?;

    std::fs::write(output, sink.to_le_bytes()?)?;
    tracing::info!(
        path = %output.display(),
        sample_rate,
        channels = 2,
        "wrote interleaved f32 little-endian audio"
    );

    if let Some(path) = directives {
        let log = log
            .lock()
            .map_err(|_| MotionAudioError::msg("directive log has been poisoned"))?;
        std::fs::write(path, serde_json::to_vec_pretty(&*log)?)?;
        tracing::info!(path = %path.display(), count = log.len(), "wrote directive log");
    }
    Ok(())
}

/// Walking through a garden, then running into the rain.
fn demo_hints(seconds: f64) -> Result<ReplayHints> {
    let walking = SceneHint::from_response_text(
        r#"{"mood":"calm","scene_type":"outdoor","key_objects":["person","path"],
            "motion_analysis":{"primary_action":"walking","movement_intensity":0.4,
            "gesture_detected":"waving","collision_events":[]},"confidence":0.8}"#,
    )?;
    let running = SceneHint::from_response_text(
        r#"{"mood":"energetic","scene_type":"nature","key_objects":["person","rain"],
            "motion_analysis":{"primary_action":"running","movement_intensity":0.9,
            "gesture_detected":"clapping","collision_events":["trips over a bench"]},
            "confidence":0.85}"#,
    )?;

    Ok(ReplayHints::new(vec![
        TimedHint {
            timestamp: 0.0,
            hint: walking,
        },
        TimedHint {
            timestamp: seconds / 2.0,
            hint: running,
        },
    ]))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Turns on-screen motion into sound", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a sound track for a directory of extracted video frames.
    Render {
        /// Directory holding the frames, sorted by file name.
        #[arg(long)]
        frames: PathBuf,
        /// Frame rate the frames were extracted at.
        #[arg(long, default_value_t = 5.0)]
        fps: f64,
        #[arg(long, default_value_t = 160)]
        width: u32,
        #[arg(long, default_value_t = 120)]
        height: u32,
        /// Timestamped scene hints recorded from a vision model.
        #[arg(long)]
        hints: Option<PathBuf>,
        /// Output path for interleaved stereo f32 samples.
        #[arg(short, long)]
        output: PathBuf,
        /// Optional JSON log of every applied directive.
        #[arg(long)]
        directives: Option<PathBuf>,
    },
    /// Render a synthetic clip with canned scene hints.
    Demo {
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        directives: Option<PathBuf>,
    },
}
