//! Color harmonization between the two portraits.
//!
//! The open-mouth portrait is usually shot under slightly different
//! lighting. Inside the mouth region the background tone of the open image
//! is pulled toward the base image while the genuine lip-shape difference
//! (the change mask) is left untouched, so the blend stage does not smear a
//! lighting seam across the face.

use image::{Rgb, RgbImage};
use ndarray::Array2;
use tracing::debug;

use crate::grid;
use crate::portrait::{crop_rgb, paste_rgb, PortraitPair};
use crate::region::{MouthRegion, RegionSource};

/// Per-pixel luma difference above which a pixel belongs to the genuine
/// lip-shape change rather than the lighting background.
const LUMA_DIFF_THRESHOLD: f32 = 15.0;
/// Channel correction factor bounds for the landmark path.
const FACTOR_MIN: f32 = 0.8;
const FACTOR_MAX: f32 = 1.2;
/// Looser bounds for the coarse global match on the heuristic path.
const GLOBAL_FACTOR_MIN: f32 = 0.5;
const GLOBAL_FACTOR_MAX: f32 = 1.5;
/// Feathering blur around the change-mask boundary.
const FEATHER_SIGMA: f32 = 1.5;
/// Mean per-channel RGB difference marking lip-difference pixels for the
/// blue-bias pass.
const LIP_DIFF_THRESHOLD: f32 = 15.0;
/// Mean blue-channel excess (open minus base) that triggers attenuation.
const BLUE_DELTA_THRESHOLD: f32 = 5.0;
/// Blue-channel gain applied inside the lip-difference mask.
const BLUE_ATTENUATION: f32 = 0.85;

/// Harmonize the open portrait's tone toward the base inside the region.
///
/// The landmark path runs the full luminance/chrominance correction; the
/// heuristic path uses a coarser global mean match. Only `pair.open` is
/// modified.
pub fn harmonize_open_portrait(pair: &mut PortraitPair, region: &MouthRegion) {
    match region.source {
        RegionSource::Landmarks(_) => harmonize_region(pair, region),
        RegionSource::Heuristic => harmonize_global(pair, region),
    }
}

/// Full correction: YCbCr background match with change-mask feathering,
/// then a blue-bias check inside the lip difference.
fn harmonize_region(pair: &mut PortraitPair, region: &MouthRegion) {
    let rect = &region.rect;
    let base_crop = crop_rgb(&pair.base, rect);
    let open_crop = crop_rgb(&pair.open, rect);

    let base_planes = rgb_to_ycbcr_planes(&base_crop);
    let open_planes = rgb_to_ycbcr_planes(&open_crop);

    let (h, w) = base_planes[0].dim();

    // Pixels where the luma moved are the actual lip-shape difference;
    // they are excluded from the background statistics.
    let mut change_mask = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            if (base_planes[0][[y, x]] - open_planes[0][[y, x]]).abs() > LUMA_DIFF_THRESHOLD {
                change_mask[[y, x]] = 1.0;
            }
        }
    }

    let mut corrected = [
        open_planes[0].clone(),
        open_planes[1].clone(),
        open_planes[2].clone(),
    ];

    for c in 0..3 {
        let mut base_sum = 0.0f64;
        let mut open_sum = 0.0f64;
        let mut count = 0usize;
        for y in 0..h {
            for x in 0..w {
                if change_mask[[y, x]] < 0.5 {
                    base_sum += base_planes[c][[y, x]] as f64;
                    open_sum += open_planes[c][[y, x]] as f64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            continue;
        }
        let base_mean = (base_sum / count as f64) as f32;
        let open_mean = (open_sum / count as f64) as f32;
        if open_mean.abs() < f32::EPSILON {
            continue;
        }

        let factor = (base_mean / open_mean).clamp(FACTOR_MIN, FACTOR_MAX);
        debug!(channel = c, factor, "Region color correction factor");
        corrected[c].mapv_inplace(|v| v * factor);
    }

    // Feather the correction toward the change mask so the true lip edge
    // keeps its original appearance.
    let feather = grid::gaussian_blur(&grid::dilate(&change_mask, 1), FEATHER_SIGMA)
        .mapv(|v| v.clamp(0.0, 1.0));

    let mut result = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let keep = feather[[y, x]];
            let yy = keep * open_planes[0][[y, x]] + (1.0 - keep) * corrected[0][[y, x]];
            let cb = keep * open_planes[1][[y, x]] + (1.0 - keep) * corrected[1][[y, x]];
            let cr = keep * open_planes[2][[y, x]] + (1.0 - keep) * corrected[2][[y, x]];
            result.put_pixel(x as u32, y as u32, Rgb(ycbcr_to_rgb(yy, cb, cr)));
        }
    }

    attenuate_blue_bias(&base_crop, &mut result);

    paste_rgb(&mut pair.open, &result, rect);
}

/// Inside the lip-difference mask, pull an excessive blue channel back
/// toward the base so the blended mouth does not glow blue.
fn attenuate_blue_bias(base_crop: &RgbImage, open_crop: &mut RgbImage) {
    let (w, h) = base_crop.dimensions();

    let mut delta_sum = 0.0f64;
    let mut lip_pixels: Vec<(u32, u32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let b = base_crop.get_pixel(x, y).0;
            let o = open_crop.get_pixel(x, y).0;
            let mean_diff = (0..3)
                .map(|c| (b[c] as f32 - o[c] as f32).abs())
                .sum::<f32>()
                / 3.0;
            if mean_diff > LIP_DIFF_THRESHOLD {
                delta_sum += o[2] as f64 - b[2] as f64;
                lip_pixels.push((x, y));
            }
        }
    }

    if lip_pixels.is_empty() {
        return;
    }

    let blue_delta = (delta_sum / lip_pixels.len() as f64) as f32;
    if blue_delta <= BLUE_DELTA_THRESHOLD {
        return;
    }

    debug!(blue_delta, "Attenuating blue bias in lip region");
    for (x, y) in lip_pixels {
        let mut px = *open_crop.get_pixel(x, y);
        px.0[2] = (px.0[2] as f32 * BLUE_ATTENUATION).round().clamp(0.0, 255.0) as u8;
        open_crop.put_pixel(x, y, px);
    }
}

/// Coarse global mean-color match for the heuristic region.
fn harmonize_global(pair: &mut PortraitPair, region: &MouthRegion) {
    let rect = &region.rect;
    let base_crop = crop_rgb(&pair.base, rect);
    let mut open_crop = crop_rgb(&pair.open, rect);
    let (w, h) = base_crop.dimensions();
    let n = (w as f64) * (h as f64);

    for c in 0..3 {
        let base_mean: f64 = base_crop.pixels().map(|p| p.0[c] as f64).sum::<f64>() / n;
        let open_mean: f64 = open_crop.pixels().map(|p| p.0[c] as f64).sum::<f64>() / n;
        if open_mean <= 0.0 {
            continue;
        }
        let factor = ((base_mean / open_mean) as f32).clamp(GLOBAL_FACTOR_MIN, GLOBAL_FACTOR_MAX);
        debug!(channel = c, factor, "Global color correction factor");
        for px in open_crop.pixels_mut() {
            px.0[c] = (px.0[c] as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }

    paste_rgb(&mut pair.open, &open_crop, rect);
}

/// Split an RGB crop into BT.601 full-range YCbCr planes.
/// Y is in [0,255]; Cb/Cr are centered on zero.
fn rgb_to_ycbcr_planes(crop: &RgbImage) -> [Array2<f32>; 3] {
    let (w, h) = crop.dimensions();
    let mut y_plane = Array2::<f32>::zeros((h as usize, w as usize));
    let mut cb_plane = Array2::<f32>::zeros((h as usize, w as usize));
    let mut cr_plane = Array2::<f32>::zeros((h as usize, w as usize));

    for (x, y, px) in crop.enumerate_pixels() {
        let [r, g, b] = px.0.map(|v| v as f32);
        y_plane[[y as usize, x as usize]] = 0.299 * r + 0.587 * g + 0.114 * b;
        cb_plane[[y as usize, x as usize]] = -0.168_736 * r - 0.331_264 * g + 0.5 * b;
        cr_plane[[y as usize, x as usize]] = 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    }

    [y_plane, cb_plane, cr_plane]
}

fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> [u8; 3] {
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}
