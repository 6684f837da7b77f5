#![deny(unreachable_patterns)]
//! Audio-driven mouth-region animation renderer.
//!
//! Given a closed-mouth portrait, an open-mouth portrait of the same
//! subject, and optionally an audio track, this crate produces a video in
//! which only the mouth/chin region animates in sync with the audio
//! loudness envelope.
//!
//! This crate provides:
//! - Portrait loading and dimension normalization
//! - Mouth/chin region localization (landmark model or heuristic fallback)
//! - Color harmonization between the two portraits
//! - Blend-mask synthesis
//! - Amplitude envelope extraction with hysteresis (synthetic fallback)
//! - Sequential frame compositing
//! - FFmpeg encoding and layered audio muxing

pub mod assemble;
pub mod command;
pub mod envelope;
pub mod error;
pub mod fs_utils;
mod grid;
pub mod harmonize;
pub mod landmarks;
pub mod mask;
pub mod portrait;
pub mod probe;
pub mod progress;
pub mod region;
pub mod render;
pub mod synth;

pub use assemble::{
    default_output_path, default_strategies, mux_with_fallback, start_encoder, FrameSink,
    MuxStrategy, ReencodeAudioMux, ReencodeBothMux, StreamCopyMux,
};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use fs_utils::move_file;
pub use harmonize::harmonize_open_portrait;
pub use envelope::{
    extract_envelope, synthetic_envelope, AudioEnvelope, EnvelopeConfig, DEFAULT_DURATION_SECS,
};
pub use error::{RenderError, RenderResult};
pub use landmarks::{
    resolve_model_path, FaceLandmarker, LandmarkPoint, OrtFaceLandmarker, DEFAULT_MODEL_PATH,
    MODEL_PATH_ENV,
};
pub use mask::build_blend_mask;
pub use portrait::PortraitPair;
pub use probe::{probe_audio, AudioInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use region::{heuristic_region, locate_mouth_region, MouthRegion, RegionSource};
pub use render::{render_talking_portrait, RenderConfig, RenderRequest};
pub use synth::{blend_alpha, compose_frame, BlendConfig, FrameSynthesizer};
