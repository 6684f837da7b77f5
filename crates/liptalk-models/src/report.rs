//! Render report: which pipeline paths actually ran.
//!
//! Every recoverable failure in the renderer substitutes a documented
//! degraded path instead of aborting. The report records those
//! substitutions so a degraded output is traceable after the fact.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::rect::PixelRect;

/// Which method determined the animated mouth/chin region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionOrigin {
    /// Facial-landmark detection succeeded.
    Landmarks,
    /// Fixed proportional fallback region.
    Heuristic,
}

/// Which source produced the mouth-openness envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeOrigin {
    /// Driven by the supplied audio track.
    Audio,
    /// Synthetic periodic pattern (no audio, or audio decode failed).
    Synthetic,
}

/// Summary of a completed render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderReport {
    /// Final output path.
    pub output: PathBuf,
    /// Resolved video duration in seconds.
    pub duration: f64,
    /// Frame rate.
    pub fps: u32,
    /// Number of frames synthesized.
    pub frames: usize,
    /// The animated region, in pixel coordinates of the base portrait.
    pub region: PixelRect,
    /// How the region was determined.
    pub region_origin: RegionOrigin,
    /// How the envelope was produced.
    pub envelope_origin: EnvelopeOrigin,
    /// Name of the mux strategy that attached the audio track, or `None`
    /// when no audio was requested or every strategy failed (video-only
    /// output).
    pub mux_strategy: Option<String>,
}

impl RenderReport {
    /// True when any fallback path was taken.
    pub fn is_degraded(&self, audio_requested: bool) -> bool {
        self.region_origin == RegionOrigin::Heuristic
            || (audio_requested
                && (self.envelope_origin == EnvelopeOrigin::Synthetic
                    || self.mux_strategy.is_none()))
    }
}
