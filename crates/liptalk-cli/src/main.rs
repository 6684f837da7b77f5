//! Talking-portrait renderer binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liptalk_media::{
    default_output_path, render_talking_portrait, FaceLandmarker, OrtFaceLandmarker,
    RenderConfig, RenderRequest,
};

/// Animate a portrait's mouth/chin region in sync with an audio track.
#[derive(Parser, Debug)]
#[command(name = "liptalk", version, about)]
struct Cli {
    /// Closed-mouth portrait
    base_image: PathBuf,

    /// Open-mouth portrait of the same subject
    open_mouth_image: PathBuf,

    /// Audio file driving the animation (WAV, MP3, ...)
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Output video path (default: <base>_lip_talking.mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Video duration in seconds (default: audio duration, else 10)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Background color as R G B; used by the whole-image generator,
    /// ignored by this region-locked renderer
    #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
    bg_color: Option<Vec<u8>>,

    /// Frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Animation smoothness in [0,1]; higher is smoother
    #[arg(long, default_value_t = 0.5)]
    smoothness: f64,

    /// Face landmark model path (default: $LIPTALK_MODEL_PATH, then
    /// models/face_mesh.onnx); a missing model falls back to the
    /// heuristic mouth region
    #[arg(long)]
    model: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if !cli.base_image.exists() {
        bail!("base image does not exist: {}", cli.base_image.display());
    }
    if !cli.open_mouth_image.exists() {
        bail!(
            "open-mouth image does not exist: {}",
            cli.open_mouth_image.display()
        );
    }
    if let Some(audio) = &cli.audio {
        if !audio.exists() {
            bail!("audio file does not exist: {}", audio.display());
        }
    }

    // A missing or unloadable model is a degraded path, not an error
    let detector: Option<Arc<dyn FaceLandmarker>> =
        match OrtFaceLandmarker::from_default_paths(cli.model.as_deref()) {
            Ok(landmarker) => Some(Arc::new(landmarker)),
            Err(e) => {
                warn!(error = %e, "Landmark model unavailable, mouth region will be heuristic");
                None
            }
        };

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.base_image));

    let mut config = RenderConfig::default();
    config.fps = cli.fps;
    config.duration = cli.duration.filter(|d| *d > 0.0);
    config.smoothness = cli.smoothness.clamp(0.0, 1.0);
    if let Some(rgb) = &cli.bg_color {
        config.bg_color = [rgb[0], rgb[1], rgb[2]];
    }

    let request = RenderRequest {
        base_image: cli.base_image,
        open_image: cli.open_mouth_image,
        audio: cli.audio.clone(),
        output,
        config,
    };

    // Cooperative cancellation on Ctrl-C, checked between frames and
    // propagated into running FFmpeg children
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling render");
            let _ = cancel_tx.send(true);
        }
    });

    let report = render_talking_portrait(&request, detector, Some(cancel_rx))
        .await
        .context("render failed")?;

    if report.is_degraded(cli.audio.is_some()) {
        warn!(
            region = ?report.region_origin,
            envelope = ?report.envelope_origin,
            mux = ?report.mux_strategy,
            "Render finished with degraded quality"
        );
    }

    info!(
        output = %report.output.display(),
        duration = report.duration,
        frames = report.frames,
        "Talking portrait generated"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::parse_from(["liptalk", "base.png", "open.png"]);
        assert_eq!(cli.base_image, PathBuf::from("base.png"));
        assert_eq!(cli.open_mouth_image, PathBuf::from("open.png"));
        assert!(cli.audio.is_none());
        assert_eq!(cli.fps, 30);
        assert!((cli.smoothness - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::parse_from([
            "liptalk",
            "base.png",
            "open.png",
            "-a",
            "speech.wav",
            "-o",
            "out.mp4",
            "-d",
            "7.5",
            "--bg-color",
            "10",
            "20",
            "30",
            "--fps",
            "25",
            "--smoothness",
            "0.8",
            "--model",
            "face.onnx",
            "--verbose",
        ]);
        assert_eq!(cli.audio, Some(PathBuf::from("speech.wav")));
        assert_eq!(cli.output, Some(PathBuf::from("out.mp4")));
        assert_eq!(cli.duration, Some(7.5));
        assert_eq!(cli.bg_color, Some(vec![10, 20, 30]));
        assert_eq!(cli.fps, 25);
        assert!(cli.verbose);
    }
}
