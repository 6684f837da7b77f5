//! End-to-end rendering pipeline.
//!
//! Stage order: load portraits, locate the mouth region, harmonize color,
//! build the blend mask, extract the envelope, fold frames into the
//! encoder, attach audio. Each stage completes before the next starts and
//! cancellation is checked between frames. Every recoverable failure is
//! substituted at its stage boundary and recorded in the returned report.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use liptalk_models::{EncodingConfig, RenderReport};

use crate::assemble::{default_strategies, mux_with_fallback, start_encoder};
use crate::command::check_ffmpeg;
use crate::envelope::{extract_envelope, EnvelopeConfig};
use crate::error::{RenderError, RenderResult};
use crate::fs_utils::move_file;
use crate::harmonize::harmonize_open_portrait;
use crate::landmarks::FaceLandmarker;
use crate::mask::build_blend_mask;
use crate::portrait::PortraitPair;
use crate::region::locate_mouth_region;
use crate::synth::{BlendConfig, FrameSynthesizer};

/// Top-level render configuration.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Output frame rate.
    pub fps: u32,
    /// Explicit duration override in seconds; `None` (or a non-positive
    /// value) resolves to the audio duration, else the default.
    pub duration: Option<f64>,
    /// Animation smoothness in [0,1]; feeds the adaptive smoothing window
    /// ceiling.
    pub smoothness: f64,
    /// Background color (RGB). Accepted for CLI parity with the sibling
    /// whole-image generator; this region-locked renderer does not use it.
    pub bg_color: [u8; 3],
    /// Encoder settings.
    pub encoding: EncodingConfig,
    /// Envelope extraction settings.
    pub envelope: EnvelopeConfig,
    /// Envelope-to-blend mapping settings.
    pub blend: BlendConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            duration: None,
            smoothness: 0.5,
            bg_color: [200, 50, 50],
            encoding: EncodingConfig::default(),
            envelope: EnvelopeConfig::default(),
            blend: BlendConfig::default(),
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> RenderResult<()> {
        if self.fps == 0 || self.fps > 120 {
            return Err(RenderError::InvalidConfig(format!(
                "fps must be in 1..=120, got {}",
                self.fps
            )));
        }
        if !self.smoothness.is_finite() {
            return Err(RenderError::InvalidConfig(
                "smoothness must be finite".to_string(),
            ));
        }
        if let Some(d) = self.duration {
            if !d.is_finite() {
                return Err(RenderError::InvalidConfig(
                    "duration must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A single render invocation.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Closed-mouth portrait.
    pub base_image: PathBuf,
    /// Open-mouth portrait.
    pub open_image: PathBuf,
    /// Optional audio track driving the animation.
    pub audio: Option<PathBuf>,
    /// Final output path.
    pub output: PathBuf,
    pub config: RenderConfig,
}

fn check_cancelled(cancel: &Option<watch::Receiver<bool>>) -> RenderResult<()> {
    if cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false) {
        return Err(RenderError::Cancelled);
    }
    Ok(())
}

/// Render the talking portrait.
///
/// The detector is injected so callers (and tests) control whether and how
/// landmark detection runs; `None` goes straight to the heuristic region.
pub async fn render_talking_portrait(
    request: &RenderRequest,
    detector: Option<Arc<dyn FaceLandmarker>>,
    cancel: Option<watch::Receiver<bool>>,
) -> RenderResult<RenderReport> {
    request.config.validate()?;

    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        base = %request.base_image.display(),
        open = %request.open_image.display(),
        audio = ?request.audio,
        output = %request.output.display(),
        "Starting render"
    );

    // Stage 1: portraits
    let mut pair = PortraitPair::load(&request.base_image, &request.open_image)?;
    check_cancelled(&cancel)?;

    // Stage 2: mouth region (never fails; falls back to the heuristic box)
    let region = locate_mouth_region(detector.as_deref(), &pair.base);
    info!(rect = ?region.rect, origin = ?region.source.origin(), "Mouth region located");

    // Stage 3: color harmonization (modifies the open portrait only)
    harmonize_open_portrait(&mut pair, &region);

    // Stage 4: blend mask, built once and reused for every frame
    let mask = build_blend_mask(&pair.base, &pair.open, &region);
    check_cancelled(&cancel)?;

    // Stage 5: envelope (decode failure falls back to synthetic)
    let envelope_config = request
        .config
        .envelope
        .clone()
        .with_smoothness(request.config.smoothness);
    let envelope = extract_envelope(
        request.audio.as_deref(),
        request.config.duration,
        request.config.fps,
        &envelope_config,
    )
    .await?;
    info!(
        frames = envelope.len(),
        duration = envelope.duration,
        origin = ?envelope.origin,
        "Envelope ready"
    );

    // Stage 6: encode frames. Without FFmpeg no video is possible, so this
    // check is fatal here even though the mux stage treats it as one more
    // recoverable strategy failure.
    check_ffmpeg()?;

    let workdir = TempDir::new()?;
    let video_only = workdir.path().join(format!("video_{run_id}.mp4"));

    let mut sink = start_encoder(
        pair.width(),
        pair.height(),
        request.config.fps,
        &request.config.encoding,
        &video_only,
        cancel.clone(),
    )?;

    let mut synthesizer = FrameSynthesizer::new(
        &pair.base,
        &pair.open,
        &region.rect,
        &mask,
        request.config.blend.clone(),
    );

    for &level in &envelope.values {
        check_cancelled(&cancel)?;
        let frame = synthesizer.next_frame(level);
        sink.write_frame(frame).await?;
    }
    let frames = sink.finish().await?;

    // Stage 7: attach audio, or promote the video-only file
    let mux_strategy = match &request.audio {
        Some(audio) => {
            let strategies = default_strategies();
            let winner = mux_with_fallback(
                &strategies,
                &video_only,
                audio,
                &request.output,
                &request.config.encoding,
                workdir.path(),
            )
            .await;

            if winner.is_none() {
                warn!("All mux strategies failed, delivering video without audio");
                move_file(&video_only, &request.output).await?;
            }
            winner.map(str::to_string)
        }
        None => {
            move_file(&video_only, &request.output).await?;
            None
        }
    };

    let report = RenderReport {
        output: request.output.clone(),
        duration: envelope.duration,
        fps: request.config.fps,
        frames,
        region: region.rect,
        region_origin: region.source.origin(),
        envelope_origin: envelope.origin,
        mux_strategy,
    };

    info!(
        %run_id,
        frames = report.frames,
        region_origin = ?report.region_origin,
        envelope_origin = ?report.envelope_origin,
        mux = ?report.mux_strategy,
        "Render complete"
    );

    Ok(report)
}
