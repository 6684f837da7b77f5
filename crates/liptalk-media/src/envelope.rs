//! Audio amplitude envelope extraction.
//!
//! This module handles:
//! 1. Decoding the audio track to 16kHz mono f32 PCM via FFmpeg
//! 2. Per-frame windowed amplitude with a sub-linear power transform
//! 3. Adaptive boost and contrast shaping
//! 4. Adaptive smoothing and open/closed hysteresis
//! 5. A synthetic periodic fallback when no audio is usable
//!
//! Audio decode failure never aborts the run: the synthetic envelope is
//! substituted and the substitution is recorded in the render report.

use std::path::Path;

use liptalk_models::EnvelopeOrigin;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{RenderError, RenderResult};
use crate::grid::mean;

/// Sample rate the audio is decoded to before analysis.
pub const PCM_SAMPLE_RATE: usize = 16000;

/// Video duration when neither audio nor an explicit duration is given.
pub const DEFAULT_DURATION_SECS: f64 = 10.0;

/// Configuration for envelope extraction.
///
/// The numeric defaults are empirically tuned; the load-bearing contracts
/// are qualitative: quieter recordings are boosted more, hysteresis
/// prevents single-frame flicker, and extraction always produces a valid
/// envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Analysis window around each frame time, in seconds (~25ms is the
    /// standard speech-processing window).
    pub window_secs: f64,

    /// Sub-linear power transform exponent; values below 1 amplify quiet
    /// segments.
    pub power: f32,

    /// Base open/close amplitude threshold.
    pub base_threshold: f32,

    /// Opening requires crossing `base_threshold * open_factor`.
    pub open_factor: f32,

    /// Closing requires falling below `base_threshold * close_factor`.
    pub close_factor: f32,

    /// Minimum time a state must persist before it may flip (~80ms).
    pub min_state_secs: f64,

    /// Gain applied to below-mean values to sharpen the contrast between
    /// speech and pauses.
    pub quiet_compression: f32,

    /// Smoothing factor in [0,1] controlling the adaptive window ceiling.
    /// Clamped to [0.1, 0.9].
    pub smoothness: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            window_secs: 0.025,
            power: 0.6,
            base_threshold: 0.08,
            open_factor: 1.3,
            close_factor: 0.7,
            min_state_secs: 0.08,
            quiet_compression: 0.7,
            smoothness: 0.5,
        }
    }
}

impl EnvelopeConfig {
    /// Builder-style setter for the smoothing factor.
    pub fn with_smoothness(mut self, smoothness: f64) -> Self {
        self.smoothness = smoothness.clamp(0.1, 0.9);
        self
    }

    /// Builder-style setter for the base threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.base_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Builder-style setter for the minimum state duration.
    pub fn with_min_state_secs(mut self, secs: f64) -> Self {
        self.min_state_secs = secs.max(0.0);
        self
    }
}

/// Per-frame mouth-openness sequence with its provenance.
#[derive(Debug, Clone)]
pub struct AudioEnvelope {
    /// Per-frame openness scalars in [0,1], length `round(duration * fps)`.
    pub values: Vec<f32>,
    /// Whether the envelope came from audio or the synthetic generator.
    pub origin: EnvelopeOrigin,
    /// Resolved total duration in seconds.
    pub duration: f64,
}

impl AudioEnvelope {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extract the mouth-openness envelope.
///
/// With audio, the resolved duration is the explicit request when given,
/// otherwise the audio duration. Without audio (or when decode fails) a
/// synthetic envelope over the requested duration (default 10s) is
/// produced instead.
pub async fn extract_envelope(
    audio: Option<&Path>,
    requested_duration: Option<f64>,
    fps: u32,
    config: &EnvelopeConfig,
) -> RenderResult<AudioEnvelope> {
    let requested = requested_duration.filter(|d| *d > 0.0);

    match audio {
        Some(path) => match audio_envelope(path, requested, fps, config).await {
            Ok(envelope) => Ok(envelope),
            Err(RenderError::Cancelled) => Err(RenderError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Audio envelope failed, falling back to synthetic pattern");
                Ok(synthetic_envelope(
                    requested.unwrap_or(DEFAULT_DURATION_SECS),
                    fps,
                    config,
                ))
            }
        },
        None => Ok(synthetic_envelope(
            requested.unwrap_or(DEFAULT_DURATION_SECS),
            fps,
            config,
        )),
    }
}

async fn audio_envelope(
    path: &Path,
    requested_duration: Option<f64>,
    fps: u32,
    config: &EnvelopeConfig,
) -> RenderResult<AudioEnvelope> {
    // Best effort: the probe is informational, decoding decides success
    if let Ok(info) = crate::probe::probe_audio(path).await {
        debug!(
            codec = %info.codec,
            sample_rate = info.sample_rate,
            channels = info.channels,
            duration = info.duration,
            "Probed audio track"
        );
    }

    let samples = decode_pcm(path).await?;

    if samples.is_empty() {
        return Err(RenderError::audio_decode("no audio data in file"));
    }

    let audio_duration = samples.len() as f64 / PCM_SAMPLE_RATE as f64;
    let duration = requested_duration.unwrap_or(audio_duration);

    debug!(
        samples = samples.len(),
        audio_duration, duration, "Decoded audio for envelope extraction"
    );

    let values = envelope_from_samples(&samples, PCM_SAMPLE_RATE, duration, fps, config)?;

    Ok(AudioEnvelope {
        values,
        origin: EnvelopeOrigin::Audio,
        duration,
    })
}

/// Decode any audio input to 16kHz mono raw f32le PCM via FFmpeg.
async fn decode_pcm(path: &Path) -> RenderResult<Vec<f32>> {
    if !path.exists() {
        return Err(RenderError::audio_decode(format!(
            "audio file not found: {}",
            path.display()
        )));
    }

    let temp_pcm = NamedTempFile::new()?;

    let cmd = FfmpegCommand::new(temp_pcm.path())
        .input(path)
        .no_video()
        .output_arg("-ar")
        .output_arg(PCM_SAMPLE_RATE.to_string())
        .output_args(["-ac", "1"])
        .output_args(["-f", "f32le"])
        .log_level("error");

    FfmpegRunner::new().run(&cmd).await.map_err(|e| match e {
        RenderError::Cancelled => RenderError::Cancelled,
        other => RenderError::audio_decode(format!("FFmpeg audio extraction failed: {other}")),
    })?;

    let bytes = tokio::fs::read(temp_pcm.path()).await?;

    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(samples)
}

/// Compute the per-frame envelope from PCM samples.
///
/// Frames whose analysis window lies past the end of the audio read as
/// zero, so audio longer than the requested duration truncates cleanly and
/// shorter audio pads with silence.
pub(crate) fn envelope_from_samples(
    samples: &[f32],
    sample_rate: usize,
    duration: f64,
    fps: u32,
    config: &EnvelopeConfig,
) -> RenderResult<Vec<f32>> {
    let total_frames = frame_count(duration, fps);

    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 {
        return Err(RenderError::audio_decode("audio signal is all zeros"));
    }

    let window_samples = ((config.window_secs * sample_rate as f64).round() as usize).max(1);

    let mut amplitudes = Vec::with_capacity(total_frames);
    for i in 0..total_frames {
        let t = i as f64 / fps as f64;
        let center = (t * sample_rate as f64) as usize;
        let start = center.saturating_sub(window_samples / 2);
        let end = (center + window_samples / 2).min(samples.len());
        if end > start {
            let window_mean =
                samples[start..end].iter().map(|s| s.abs() / peak).sum::<f32>()
                    / (end - start) as f32;
            amplitudes.push(window_mean.powf(config.power));
        } else {
            amplitudes.push(0.0);
        }
    }

    enhance_contrast(&mut amplitudes, config);

    let mut smoothed = adaptive_smooth(&amplitudes, fps, config.smoothness);
    apply_hysteresis(&mut smoothed, fps, config);

    Ok(smoothed)
}

/// Envelope length for a duration/fps pair.
pub(crate) fn frame_count(duration: f64, fps: u32) -> usize {
    (duration * fps as f64).round() as usize
}

/// Boost factor ladder: quieter recordings are boosted more.
pub(crate) fn pick_boost(max_amplitude: f32) -> f32 {
    if max_amplitude < 0.3 {
        3.0
    } else if max_amplitude < 0.6 {
        2.0
    } else {
        1.5
    }
}

/// Re-center values around the mean with the adaptive boost, then compress
/// below-mean values so pauses read as closed.
fn enhance_contrast(values: &mut [f32], config: &EnvelopeConfig) {
    if values.is_empty() {
        return;
    }

    let avg = mean(values);
    let max = values.iter().fold(0.0f32, |m, &v| m.max(v));
    let boost = pick_boost(max);

    debug!(mean = avg, max, boost, "Amplitude statistics");

    for v in values.iter_mut() {
        let mut enhanced = (*v - avg) * boost + avg;
        if enhanced < avg {
            enhanced *= config.quiet_compression;
        }
        *v = enhanced.clamp(0.0, 1.0);
    }
}

/// Moving average with a per-sample window: small where the local
/// rate-of-change is high (preserves onset timing), large where the signal
/// is stable.
pub(crate) fn adaptive_smooth(values: &[f32], fps: u32, smoothness: f64) -> Vec<f32> {
    if values.len() < 2 {
        return values.to_vec();
    }

    let max_amp = values.iter().fold(0.001f32, |m, &v| m.max(v));

    let smooth_max = ((fps as f64 * smoothness) as usize).max(1);
    let smooth_min = ((smooth_max as f64 * 0.3) as usize).max(1);

    let mut result = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let diff = if i == 0 {
            0.0
        } else {
            (values[i] - values[i - 1]).abs()
        };
        let change_rate = diff / max_amp;
        let shrink = 1.0 - (change_rate * 10.0).min(0.8);
        let window = ((smooth_max as f32 * shrink) as usize).max(smooth_min);

        let start = i.saturating_sub(window / 2);
        let end = (i + window / 2 + 1).min(values.len());
        result.push(mean(&values[start..end]));
    }

    result
}

/// Open/closed hysteresis.
///
/// A state may only flip after crossing the asymmetric threshold
/// (`base * open_factor` upward, `base * close_factor` downward) and only
/// once the previous state has persisted for the minimum frame count.
/// Within the hold window, values are pulled toward the previous sample so
/// no single-frame flicker survives smoothing.
///
/// Returns the indices where the state flipped (used by tests and debug
/// logging to verify transition spacing).
pub(crate) fn apply_hysteresis(
    values: &mut [f32],
    fps: u32,
    config: &EnvelopeConfig,
) -> Vec<usize> {
    let min_frames = ((fps as f64 * config.min_state_secs).round() as usize).max(1);
    let threshold = config.base_threshold;

    let mut open = false;
    let mut last_change = 0usize;
    let mut flips = Vec::new();

    for i in 1..values.len() {
        if i - last_change < min_frames {
            // Hold the current state: keep open values from collapsing and
            // closed values from spiking
            if open {
                values[i] = values[i].max(values[i - 1] * 0.95);
            } else {
                values[i] = values[i].min(values[i - 1] * 1.05);
            }
        } else {
            let should_close = open && values[i] < threshold * config.close_factor;
            let should_open = !open && values[i] > threshold * config.open_factor;
            if should_close || should_open {
                open = !open;
                last_change = i;
                flips.push(i);
            }
        }
    }

    flips
}

/// Synthetic periodic envelope for when no audio is usable: a ~2 cycle/s
/// pattern with bounded jitter and enforced silence gaps, run through the
/// same smoothing and hysteresis as the audio path.
pub fn synthetic_envelope(duration: f64, fps: u32, config: &EnvelopeConfig) -> AudioEnvelope {
    let total_frames = frame_count(duration, fps);
    let mut rng = rand::rng();

    let mut values = Vec::with_capacity(total_frames);
    for i in 0..total_frames {
        let t = i as f64 / fps as f64;
        let base_cycle = 0.5 * (1.0 + (t * 2.0 * std::f64::consts::PI).sin()) as f32;
        let jitter = rng.random::<f32>() * 0.2;

        // Keep clear closed-mouth stretches between cycles
        let value = if base_cycle < 0.3 {
            0.0
        } else {
            (base_cycle + jitter - 0.3).min(0.75)
        };
        values.push(value);
    }

    let mut smoothed = adaptive_smooth(&values, fps, config.smoothness);
    apply_hysteresis(&mut smoothed, fps, config);
    for v in smoothed.iter_mut() {
        *v = v.clamp(0.0, 1.0);
    }

    AudioEnvelope {
        values: smoothed,
        origin: EnvelopeOrigin::Synthetic,
        duration,
    }
}
