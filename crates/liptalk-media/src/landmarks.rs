//! Face Mesh ONNX inference for lip and chin landmarks.
//!
//! The detector is a constructor-injected trait so the region locator can
//! run against a stub in tests and so a missing model file degrades to the
//! heuristic region instead of failing the run.
//!
//! Notes:
//! - The model consumes a 192x192 RGB crop normalized to [-1,1], CHW.
//! - Output coordinates are normalized; they are mapped back to portrait
//!   pixel space assuming the portrait itself is the face crop (the inputs
//!   to this renderer are head shots).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{imageops, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::debug;

use crate::error::{RenderError, RenderResult};

/// Environment variable overriding the model search path.
pub const MODEL_PATH_ENV: &str = "LIPTALK_MODEL_PATH";

/// Default model location relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "models/face_mesh.onnx";

/// Number of points in the face mesh topology.
pub const MESH_POINT_COUNT: usize = 468;

/// Input edge length expected by the model.
const MODEL_INPUT_SIZE: u32 = 192;

/// Outer lip contour indices in the face mesh topology.
pub const LIP_OUTER: [usize; 20] = [
    61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291, 409, 270, 269, 267, 0, 37, 39, 40, 185,
];

/// Inner lip contour indices.
pub const LIP_INNER: [usize; 20] = [
    78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308, 415, 310, 311, 312, 13, 82, 81, 80, 191,
];

/// Lower jaw / chin indices (the bottom arc of the face oval).
pub const JAW_LINE: [usize; 13] = [
    152, 148, 176, 149, 150, 136, 172, 377, 400, 378, 379, 365, 397,
];

/// A detected 2D keypoint in portrait pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

/// Facial-landmark detector interface.
pub trait FaceLandmarker: Send + Sync {
    /// Detect face landmarks on a portrait.
    ///
    /// Implementations return `ModelUnavailable` for any condition that
    /// should route the caller to the heuristic region (missing model,
    /// inference failure, no usable face).
    fn detect(&self, image: &RgbImage) -> RenderResult<Vec<LandmarkPoint>>;

    /// Detector name for logging.
    fn name(&self) -> &'static str;
}

/// Resolve the model path: explicit flag, then env var, then the default
/// location. Returns `ModelUnavailable` when no candidate exists on disk.
pub fn resolve_model_path(explicit: Option<&Path>) -> RenderResult<PathBuf> {
    let candidates: Vec<PathBuf> = explicit
        .map(|p| vec![p.to_path_buf()])
        .unwrap_or_else(|| {
            let mut v = Vec::new();
            if let Ok(env_path) = std::env::var(MODEL_PATH_ENV) {
                v.push(PathBuf::from(env_path));
            }
            v.push(PathBuf::from(DEFAULT_MODEL_PATH));
            v
        });

    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }

    Err(RenderError::model_unavailable(format!(
        "no face mesh model at {}",
        candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

/// ONNX Runtime-backed face mesh landmarker.
pub struct OrtFaceLandmarker {
    session: Mutex<Session>,
}

impl std::fmt::Debug for OrtFaceLandmarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtFaceLandmarker").finish_non_exhaustive()
    }
}

impl OrtFaceLandmarker {
    /// Load the model from an explicit path.
    pub fn load(model_path: &Path) -> RenderResult<Self> {
        if !model_path.exists() {
            return Err(RenderError::model_unavailable(format!(
                "face mesh model not found at {}",
                model_path.display()
            )));
        }

        let model_bytes = std::fs::read(model_path)
            .map_err(|e| RenderError::model_unavailable(format!("ORT read model file: {e}")))?;

        let session = Session::builder()
            .map_err(|e| RenderError::model_unavailable(format!("ORT session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RenderError::model_unavailable(format!("ORT opt level: {e}")))?
            .commit_from_memory(model_bytes.as_slice())
            .map_err(|e| RenderError::model_unavailable(format!("ORT load model: {e}")))?;

        debug!(model = %model_path.display(), "Face mesh model loaded");

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Load via `resolve_model_path`.
    pub fn from_default_paths(explicit: Option<&Path>) -> RenderResult<Self> {
        Self::load(&resolve_model_path(explicit)?)
    }
}

impl FaceLandmarker for OrtFaceLandmarker {
    fn detect(&self, image: &RgbImage) -> RenderResult<Vec<LandmarkPoint>> {
        let resized = imageops::resize(
            image,
            MODEL_INPUT_SIZE,
            MODEL_INPUT_SIZE,
            imageops::FilterType::Triangle,
        );

        let tensor = rgb_to_chw_tensor(&resized)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| RenderError::model_unavailable("ORT session poisoned"))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| RenderError::model_unavailable(format!("ORT run failed: {e}")))?;

        let output = outputs
            .get("output")
            .ok_or_else(|| RenderError::model_unavailable("ORT returned no outputs"))?;

        let landmarks = extract_landmarks(output, image.width(), image.height())?;
        validate_landmarks(&landmarks, image.width(), image.height())?;

        Ok(landmarks)
    }

    fn name(&self) -> &'static str {
        "ort-face-mesh"
    }
}

/// Convert an RGB buffer to an ORT tensor (1,3,H,W) normalized to [-1,1].
fn rgb_to_chw_tensor(img: &RgbImage) -> RenderResult<Value> {
    let (w, h) = img.dimensions();
    let data = img.as_raw();

    let mut chw = Vec::with_capacity((h * w * 3) as usize);
    // HWC -> CHW
    for c in 0..3usize {
        for y in 0..h as usize {
            for x in 0..w as usize {
                let idx = y * w as usize * 3 + x * 3 + c;
                let v = data[idx] as f32 / 255.0;
                chw.push(v * 2.0 - 1.0);
            }
        }
    }

    let shape = vec![1usize, 3, h as usize, w as usize];
    let boxed = chw.into_boxed_slice();
    Tensor::from_array((shape, boxed))
        .map(Value::from)
        .map_err(|e| RenderError::model_unavailable(format!("ORT tensor: {e}")))
}

/// Extract landmarks from a (1,468,3) or (468,3) output and map them to
/// portrait pixel coordinates.
fn extract_landmarks(output: &Value, width: u32, height: u32) -> RenderResult<Vec<LandmarkPoint>> {
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| RenderError::model_unavailable(format!("ORT extract: {e}")))?;

    let (points, dims) = match shape.len() {
        3 if shape[0] == 1 => (shape[1] as usize, shape[2] as usize),
        2 => (shape[0] as usize, shape[1] as usize),
        _ => {
            return Err(RenderError::model_unavailable(format!(
                "unexpected face mesh output shape: {shape:?}"
            )))
        }
    };

    if dims < 2 || data.len() < points * dims {
        return Err(RenderError::model_unavailable(
            "face mesh output too small",
        ));
    }

    // Some exports emit coordinates in model-input pixels rather than
    // normalized units; rescale when the values are clearly out of range.
    let max_coord = data
        .iter()
        .take(points * dims)
        .fold(0.0f32, |m, v| m.max(v.abs()));
    let scale = if max_coord > 2.0 {
        1.0 / MODEL_INPUT_SIZE as f32
    } else {
        1.0
    };

    let mut landmarks = Vec::with_capacity(points);
    for i in 0..points {
        let base = i * dims;
        let nx = data[base] * scale;
        let ny = data[base + 1] * scale;
        landmarks.push(LandmarkPoint {
            x: nx * width as f32,
            y: ny * height as f32,
        });
    }

    Ok(landmarks)
}

/// Reject outputs with no usable face: wrong point count, non-finite
/// coordinates, or a degenerate spread.
fn validate_landmarks(landmarks: &[LandmarkPoint], width: u32, height: u32) -> RenderResult<()> {
    if landmarks.len() < MESH_POINT_COUNT {
        return Err(RenderError::model_unavailable(format!(
            "expected {} landmarks, got {}",
            MESH_POINT_COUNT,
            landmarks.len()
        )));
    }

    if landmarks.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(RenderError::model_unavailable(
            "non-finite landmark coordinates",
        ));
    }

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in landmarks {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let spread_x = (max_x - min_x) / width.max(1) as f32;
    let spread_y = (max_y - min_y) / height.max(1) as f32;
    if spread_x < 0.02 || spread_y < 0.02 {
        return Err(RenderError::model_unavailable(
            "degenerate landmark geometry, no face",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_points() -> Vec<LandmarkPoint> {
        (0..MESH_POINT_COUNT)
            .map(|i| LandmarkPoint {
                x: 10.0 + (i % 30) as f32,
                y: 20.0 + (i / 30) as f32,
            })
            .collect()
    }

    #[test]
    fn test_validate_accepts_spread_face() {
        assert!(validate_landmarks(&spread_points(), 100, 100).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_output() {
        let pts = vec![LandmarkPoint { x: 1.0, y: 1.0 }; 67];
        assert!(matches!(
            validate_landmarks(&pts, 100, 100),
            Err(RenderError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_validate_rejects_degenerate_cluster() {
        let pts = vec![LandmarkPoint { x: 50.0, y: 50.0 }; MESH_POINT_COUNT];
        assert!(matches!(
            validate_landmarks(&pts, 100, 100),
            Err(RenderError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut pts = spread_points();
        pts[10].x = f32::NAN;
        assert!(validate_landmarks(&pts, 100, 100).is_err());
    }

    #[test]
    fn test_load_missing_model_is_recoverable() {
        let err = OrtFaceLandmarker::load(Path::new("/nonexistent/model.onnx")).unwrap_err();
        assert!(matches!(err, RenderError::ModelUnavailable(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_resolve_model_path_missing_everywhere() {
        let err = resolve_model_path(Some(Path::new("/nonexistent/model.onnx"))).unwrap_err();
        assert!(matches!(err, RenderError::ModelUnavailable(_)));
    }

    #[test]
    fn test_lip_indices_within_mesh() {
        assert!(LIP_OUTER.iter().all(|&i| i < MESH_POINT_COUNT));
        assert!(LIP_INNER.iter().all(|&i| i < MESH_POINT_COUNT));
        assert!(JAW_LINE.iter().all(|&i| i < MESH_POINT_COUNT));
    }
}
