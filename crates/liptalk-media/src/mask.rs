//! Spatial blend-weight mask over the mouth region.
//!
//! The mask is built once and reused for every frame. On the landmark path
//! it combines the thresholded lip difference between the two portraits
//! with a radial gradient centered on the difference centroid; the gradient
//! decays slower below the centroid so the chin follows the jaw instead of
//! being cut off. The heuristic path (and a pixel-identical portrait pair)
//! gets a blurred centered circle.

use image::RgbImage;
use ndarray::Array2;
use tracing::debug;

use crate::grid;
use crate::portrait::crop_rgb;
use crate::region::{MouthRegion, RegionSource};

/// Summed per-channel absolute difference marking a lip pixel.
const DIFF_THRESHOLD: f32 = 25.0;
/// Dilation passes applied to the binary lip mask.
const DILATE_ITERATIONS: usize = 2;
/// Weight of the radial gradient when combined with the lip mask.
const GRADIENT_WEIGHT: f32 = 0.8;
/// Below-centroid decay boost (the chin side falls off slower).
const CHIN_BOOST: f32 = 1.5;
/// Gradient reach as a fraction of the region height.
const MAX_RADIUS_RATIO: f32 = 0.7;
/// The centroid is nudged toward the chin before the gradient is drawn.
const CENTROID_CHIN_SHIFT: f32 = 1.1;
/// Final smoothing blur.
const BLUR_SIGMA: f32 = 2.0;
/// Peak value below which the mask is considered too flat and is
/// renormalized to full contrast.
const MIN_PEAK: f32 = 0.2;
/// Circle radius of the fallback mask, as a fraction of the smaller
/// half-extent.
const FALLBACK_RADIUS_RATIO: f32 = 0.8;
/// Blur applied to the fallback circle edge.
const FALLBACK_BLUR_SIGMA: f32 = 3.5;

/// Build the blend-weight mask for the region. Values are in [0,1] and the
/// result is deterministic for identical inputs.
pub fn build_blend_mask(base: &RgbImage, open: &RgbImage, region: &MouthRegion) -> Array2<f32> {
    let rect = &region.rect;
    let (h, w) = (rect.height as usize, rect.width as usize);

    match &region.source {
        RegionSource::Landmarks(_) => {
            let base_crop = crop_rgb(base, rect);
            let open_crop = crop_rgb(open, rect);
            match lip_difference_mask(&base_crop, &open_crop) {
                Some(lip) => landmark_mask(&lip),
                None => {
                    debug!("No lip difference between portraits, using fallback mask");
                    fallback_mask(h, w)
                }
            }
        }
        RegionSource::Heuristic => fallback_mask(h, w),
    }
}

/// Threshold the summed per-channel difference into a binary lip mask.
/// Returns `None` when no pixel crosses the threshold.
fn lip_difference_mask(base: &RgbImage, open: &RgbImage) -> Option<Array2<f32>> {
    let (w, h) = base.dimensions();
    let mut mask = Array2::<f32>::zeros((h as usize, w as usize));
    let mut any = false;

    for y in 0..h {
        for x in 0..w {
            let b = base.get_pixel(x, y).0;
            let o = open.get_pixel(x, y).0;
            let diff: f32 = (0..3).map(|c| (b[c] as f32 - o[c] as f32).abs()).sum();
            if diff > DIFF_THRESHOLD {
                mask[[y as usize, x as usize]] = 1.0;
                any = true;
            }
        }
    }

    any.then_some(mask)
}

/// Combine the dilated lip mask with an asymmetric radial gradient, blur,
/// and renormalize when the result is too flat.
fn landmark_mask(lip: &Array2<f32>) -> Array2<f32> {
    let dilated = grid::dilate(lip, DILATE_ITERATIONS);

    let (cy, cx) = centroid(&dilated);
    let (h, w) = dilated.dim();
    // Nudge the center toward the chin
    let cy = (cy * CENTROID_CHIN_SHIFT).min(h as f32 - 1.0);

    let gradient = radial_gradient(h, w, cy, cx);

    let mut combined = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            combined[[y, x]] = dilated[[y, x]].max(gradient[[y, x]] * GRADIENT_WEIGHT);
        }
    }

    let blurred = grid::gaussian_blur(&combined, BLUR_SIGMA).mapv(|v| v.clamp(0.0, 1.0));

    let peak = blurred.iter().fold(0.0f32, |m, &v| m.max(v));
    if peak < MIN_PEAK {
        debug!(peak, "Blend mask too flat, renormalizing contrast");
        grid::normalize_to_unit(&blurred)
    } else {
        blurred
    }
}

/// Radial gradient decaying with squared distance from the centroid, with
/// the below-centroid side boosted so weights reach the chin.
pub(crate) fn radial_gradient(h: usize, w: usize, cy: f32, cx: f32) -> Array2<f32> {
    let max_radius = (h as f32 * MAX_RADIUS_RATIO).max(1.0);
    let mut weights = Array2::<f32>::zeros((h, w));

    for y in 0..h {
        for x in 0..w {
            let dy = y as f32 - cy;
            let dx = x as f32 - cx;
            let distance = (dy * dy + dx * dx).sqrt();
            if distance < max_radius {
                let mut weight = 1.0 - (distance / max_radius).powi(2);
                if (y as f32) > cy {
                    weight = (weight * CHIN_BOOST).min(1.0);
                }
                weights[[y, x]] = weight;
            }
        }
    }

    weights
}

/// Centered blurred circle for when no usable lip difference exists.
fn fallback_mask(h: usize, w: usize) -> Array2<f32> {
    let cy = h as f32 / 2.0;
    let cx = w as f32 / 2.0;
    let radius = (cx.min(cy) * FALLBACK_RADIUS_RATIO).max(1.0);

    let mut circle = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let dy = y as f32 - cy;
            let dx = x as f32 - cx;
            if (dy * dy + dx * dx).sqrt() <= radius {
                circle[[y, x]] = 1.0;
            }
        }
    }

    grid::gaussian_blur(&circle, FALLBACK_BLUR_SIGMA).mapv(|v| v.clamp(0.0, 1.0))
}

/// Mass centroid of a weight grid; falls back to the geometric center of
/// an all-zero grid.
fn centroid(mask: &Array2<f32>) -> (f32, f32) {
    let (h, w) = mask.dim();
    let mut sum = 0.0f64;
    let mut sy = 0.0f64;
    let mut sx = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let v = mask[[y, x]] as f64;
            sum += v;
            sy += v * y as f64;
            sx += v * x as f64;
        }
    }
    if sum <= 0.0 {
        return (h as f32 / 2.0, w as f32 / 2.0);
    }
    ((sy / sum) as f32, (sx / sum) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::LandmarkPoint;
    use image::Rgb;
    use liptalk_models::PixelRect;

    fn landmark_region(rect: PixelRect) -> MouthRegion {
        MouthRegion {
            rect,
            source: RegionSource::Landmarks(vec![LandmarkPoint { x: 0.0, y: 0.0 }]),
        }
    }

    fn portraits_with_lip_patch() -> (RgbImage, RgbImage) {
        let base = RgbImage::from_pixel(40, 40, Rgb([120, 120, 120]));
        let mut open = base.clone();
        for y in 18..26 {
            for x in 12..28 {
                open.put_pixel(x, y, Rgb([40, 30, 30]));
            }
        }
        (base, open)
    }

    #[test]
    fn test_mask_values_in_unit_range() {
        let (base, open) = portraits_with_lip_patch();
        let region = landmark_region(PixelRect::new(0, 0, 40, 40));
        let mask = build_blend_mask(&base, &open, &region);
        assert_eq!(mask.dim(), (40, 40));
        assert!(mask.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(mask.iter().any(|&v| v > 0.5), "mask should have weight");
    }

    #[test]
    fn test_mask_idempotent() {
        let (base, open) = portraits_with_lip_patch();
        let region = landmark_region(PixelRect::new(0, 0, 40, 40));
        let a = build_blend_mask(&base, &open, &region);
        let b = build_blend_mask(&base, &open, &region);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_portraits_use_fallback() {
        let base = RgbImage::from_pixel(30, 30, Rgb([100, 100, 100]));
        let open = base.clone();
        let region = landmark_region(PixelRect::new(0, 0, 30, 30));

        let mask = build_blend_mask(&base, &open, &region);
        // Non-empty fallback mask, strongest at the center
        let center = mask[[15, 15]];
        assert!(center > 0.5);
        assert!(center >= mask[[15, 28]]);
    }

    #[test]
    fn test_heuristic_region_gets_fallback() {
        let base = RgbImage::from_pixel(30, 30, Rgb([100, 100, 100]));
        let region = MouthRegion {
            rect: PixelRect::new(5, 5, 20, 20),
            source: RegionSource::Heuristic,
        };
        let mask = build_blend_mask(&base, &base, &region);
        assert_eq!(mask.dim(), (20, 20));
        assert!(mask[[10, 10]] > 0.5);
    }

    #[test]
    fn test_gradient_monotone_along_ray() {
        // Sample to the right of the centroid at the centroid row: weights
        // must be non-increasing with distance
        let g = radial_gradient(41, 41, 20.0, 20.0);
        let mut prev = f32::INFINITY;
        for x in 20..41 {
            let v = g[[20, x]];
            assert!(v <= prev + 1e-6, "gradient increased at x={x}");
            prev = v;
        }
    }

    #[test]
    fn test_gradient_chin_side_decays_slower() {
        let g = radial_gradient(41, 41, 20.0, 20.0);
        // Same distance above and below the centroid: below wins
        assert!(g[[30, 20]] > g[[10, 20]]);
    }

    #[test]
    fn test_fallback_monotone_from_center() {
        let mask = fallback_mask(30, 30);
        let mut prev = f32::INFINITY;
        for x in 15..30 {
            let v = mask[[15, x]];
            assert!(v <= prev + 1e-6, "fallback mask increased at x={x}");
            prev = v;
        }
    }

    #[test]
    fn test_centroid_of_offset_patch() {
        let mut m = Array2::<f32>::zeros((10, 10));
        m[[8, 2]] = 1.0;
        let (cy, cx) = centroid(&m);
        assert!((cy - 8.0).abs() < 1e-6);
        assert!((cx - 2.0).abs() < 1e-6);

        let empty = Array2::<f32>::zeros((10, 10));
        assert_eq!(centroid(&empty), (5.0, 5.0));
    }
}
