//! Error types for the rendering pipeline.
//!
//! Only two classes are unconditionally fatal: unreadable source images and
//! frame-to-video encoding failures. Everything else is caught at its stage
//! boundary and substituted with a documented degraded continuation.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while rendering a talking portrait.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Failed to load image {path}: {message}")]
    ImageLoad { path: PathBuf, message: String },

    #[error("FFmpeg command failed: {message}")]
    Ffmpeg {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Frame encoding failed: {message}")]
    Encode {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Audio decode failed: {0}")]
    AudioDecode(String),

    #[error("Landmark model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Mux strategy '{strategy}' failed: {message}")]
    Mux {
        strategy: &'static str,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl RenderError {
    /// Create an image load error.
    pub fn image_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ImageLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a raw FFmpeg failure error.
    pub fn ffmpeg(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Ffmpeg {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Convert a raw FFmpeg failure into a stage-specific error, leaving
    /// other variants untouched.
    pub fn into_encode(self) -> Self {
        match self {
            Self::Ffmpeg {
                message,
                stderr,
                exit_code,
            } => Self::Encode {
                message,
                stderr,
                exit_code,
            },
            other => other,
        }
    }

    /// Create an encode failure error.
    pub fn encode(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Encode {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an audio decode error.
    pub fn audio_decode(message: impl Into<String>) -> Self {
        Self::AudioDecode(message.into())
    }

    /// Create a model unavailable error.
    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable(message.into())
    }

    /// Create a mux failure error.
    pub fn mux(strategy: &'static str, message: impl Into<String>) -> Self {
        Self::Mux {
            strategy,
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole run.
    ///
    /// Recovered classes (`AudioDecode`, `ModelUnavailable`, `Mux`) are
    /// handled at their stage boundary and never cross it.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AudioDecode(_) | Self::ModelUnavailable(_) | Self::Mux { .. }
        )
    }
}
