//! Mouth/chin region localization.
//!
//! The landmark path computes an asymmetrically padded bounding box around
//! the lip contours and lower jaw; the padding is larger below the
//! landmarks than above because speech moves the jaw and chin more than the
//! lips. Detection failure of any kind routes to a fixed proportional
//! region and is never propagated as an error.

use image::RgbImage;
use liptalk_models::{PixelRect, RegionOrigin};
use tracing::{debug, warn};

use crate::error::RenderResult;
use crate::landmarks::{FaceLandmarker, LandmarkPoint, JAW_LINE, LIP_INNER, LIP_OUTER};

/// Horizontal padding as a fraction of the landmark box width.
const H_PAD_RATIO: f32 = 0.2;
/// Padding above the landmarks as a fraction of the box height.
const V_PAD_TOP_RATIO: f32 = 0.2;
/// Padding below the landmarks (toward the chin) as a fraction of the box
/// height.
const V_PAD_BOTTOM_RATIO: f32 = 0.6;

/// Heuristic region proportions: x in [25%, 75%], y in [50%, 90%].
const HEURISTIC_X_MIN: f32 = 0.25;
const HEURISTIC_X_MAX: f32 = 0.75;
const HEURISTIC_Y_MIN: f32 = 0.50;
const HEURISTIC_Y_MAX: f32 = 0.90;

/// Which method produced the region, with the landmark points when
/// detection succeeded.
#[derive(Debug, Clone)]
pub enum RegionSource {
    Landmarks(Vec<LandmarkPoint>),
    Heuristic,
}

impl RegionSource {
    /// The serializable tag for reports.
    pub fn origin(&self) -> RegionOrigin {
        match self {
            Self::Landmarks(_) => RegionOrigin::Landmarks,
            Self::Heuristic => RegionOrigin::Heuristic,
        }
    }
}

/// The animated mouth/chin bounding box.
#[derive(Debug, Clone)]
pub struct MouthRegion {
    pub rect: PixelRect,
    pub source: RegionSource,
}

/// Locate the mouth/chin region on the base portrait.
///
/// Never fails: if no detector is supplied, or detection errors, or the
/// resulting box is unusable, the fixed proportional region is returned.
pub fn locate_mouth_region(
    detector: Option<&dyn FaceLandmarker>,
    image: &RgbImage,
) -> MouthRegion {
    if let Some(det) = detector {
        match landmark_region(det, image) {
            Ok(region) => {
                debug!(rect = ?region.rect, detector = det.name(), "Mouth region from landmarks");
                return region;
            }
            Err(e) => {
                warn!(error = %e, "Landmark detection failed, using heuristic mouth region");
            }
        }
    }

    heuristic_region(image)
}

fn landmark_region(detector: &dyn FaceLandmarker, image: &RgbImage) -> RenderResult<MouthRegion> {
    let all = detector.detect(image)?;

    if all.len() < crate::landmarks::MESH_POINT_COUNT {
        return Err(crate::error::RenderError::model_unavailable(format!(
            "detector returned {} landmarks, need {}",
            all.len(),
            crate::landmarks::MESH_POINT_COUNT
        )));
    }

    let mut points: Vec<LandmarkPoint> = Vec::with_capacity(LIP_OUTER.len() + LIP_INNER.len() + JAW_LINE.len());
    for &idx in LIP_OUTER.iter().chain(LIP_INNER.iter()).chain(JAW_LINE.iter()) {
        points.push(all[idx]);
    }

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in &points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let box_w = max_x - min_x;
    let box_h = max_y - min_y;

    let rect = PixelRect::from_bounds_clipped(
        min_x - box_w * H_PAD_RATIO,
        min_y - box_h * V_PAD_TOP_RATIO,
        max_x + box_w * H_PAD_RATIO,
        max_y + box_h * V_PAD_BOTTOM_RATIO,
        image.width(),
        image.height(),
    )
    .ok_or_else(|| {
        crate::error::RenderError::model_unavailable("landmark region empty after clipping")
    })?;

    Ok(MouthRegion {
        rect,
        source: RegionSource::Landmarks(points),
    })
}

/// Fixed proportional region for when detection is unavailable.
pub fn heuristic_region(image: &RgbImage) -> MouthRegion {
    let w = image.width() as f32;
    let h = image.height() as f32;

    let rect = PixelRect::from_bounds_clipped(
        w * HEURISTIC_X_MIN,
        h * HEURISTIC_Y_MIN,
        w * HEURISTIC_X_MAX,
        h * HEURISTIC_Y_MAX,
        image.width(),
        image.height(),
    )
    // The proportions always leave a non-empty box for any image of at
    // least 4x4 pixels; for anything smaller take the whole image.
    .unwrap_or_else(|| PixelRect::new(0, 0, image.width().max(1), image.height().max(1)));

    debug!(rect = ?rect, "Mouth region from heuristic proportions");

    MouthRegion {
        rect,
        source: RegionSource::Heuristic,
    }
}
