//! Sequential frame compositing.
//!
//! Frames form an explicit left-fold: `frame[i] = compose(frame[i-1],
//! base, open, mask, envelope[i])`. The previous frame is only the
//! structural canvas; blended pixels are always sourced from the original
//! base and the color-corrected open portrait. The chaining trades
//! throughput for temporal stability and blocks naive per-frame
//! parallelization.

use image::RgbImage;
use liptalk_models::PixelRect;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Configuration for envelope-to-blend-coefficient mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendConfig {
    /// Envelope level below which the mouth is fully closed.
    pub alpha_threshold: f32,

    /// Envelope level at which the blend coefficient saturates.
    pub alpha_knee: f32,

    /// Hard cap on the blend coefficient; prevents an unnaturally wide
    /// mouth.
    pub alpha_cap: f32,

    /// A level rising by more than this ratio over the previous frame is a
    /// speech onset.
    pub pop_ratio: f32,

    /// Onset detection also requires the level to exceed
    /// `alpha_threshold * pop_threshold_factor`.
    pub pop_threshold_factor: f32,

    /// Blend coefficient forced on a detected onset, so the "pop" survives
    /// the smoothing.
    pub pop_alpha: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            alpha_threshold: 0.06,
            alpha_knee: 0.25,
            alpha_cap: 0.9,
            pop_ratio: 1.5,
            pop_threshold_factor: 1.2,
            pop_alpha: 0.6,
        }
    }
}

/// Map an envelope level to a blend coefficient.
///
/// Below the threshold the mouth is closed (alpha 0); above it the level
/// is scaled into [0, cap]. A sharp rise relative to the previous level
/// forces the coefficient up to preserve speech onsets.
pub fn blend_alpha(level: f32, prev_level: f32, config: &BlendConfig) -> f32 {
    let mut alpha = if level > config.alpha_threshold {
        ((level - config.alpha_threshold) / (config.alpha_knee - config.alpha_threshold))
            .clamp(0.0, config.alpha_cap)
    } else {
        0.0
    };

    if level > prev_level * config.pop_ratio
        && level > config.alpha_threshold * config.pop_threshold_factor
    {
        alpha = alpha.max(config.pop_alpha);
    }

    alpha
}

/// One fold step: composite the mouth region onto the previous frame.
///
/// The blended pixels read from `base` and `open`, never from the canvas;
/// with alpha 0 the region is exactly the base pixels.
pub fn compose_frame(
    prev: &RgbImage,
    base: &RgbImage,
    open: &RgbImage,
    region: &PixelRect,
    mask: &Array2<f32>,
    alpha: f32,
) -> RgbImage {
    let mut canvas = prev.clone();

    for ry in 0..region.height {
        for rx in 0..region.width {
            let x = region.x + rx;
            let y = region.y + ry;
            let weight = mask[[ry as usize, rx as usize]] * alpha;

            let b = base.get_pixel(x, y).0;
            let o = open.get_pixel(x, y).0;
            let mut px = [0u8; 3];
            for c in 0..3 {
                let blended = (1.0 - weight) * b[c] as f32 + weight * o[c] as f32;
                px[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            canvas.put_pixel(x, y, image::Rgb(px));
        }
    }

    canvas
}

/// Owns the fold state and yields frames in strictly increasing order.
pub struct FrameSynthesizer<'a> {
    base: &'a RgbImage,
    open: &'a RgbImage,
    region: &'a PixelRect,
    mask: &'a Array2<f32>,
    config: BlendConfig,
    prev_frame: RgbImage,
    prev_level: f32,
}

impl<'a> FrameSynthesizer<'a> {
    pub fn new(
        base: &'a RgbImage,
        open: &'a RgbImage,
        region: &'a PixelRect,
        mask: &'a Array2<f32>,
        config: BlendConfig,
    ) -> Self {
        Self {
            base,
            open,
            region,
            mask,
            config,
            // Frame -1 is the base portrait
            prev_frame: base.clone(),
            prev_level: 0.0,
        }
    }

    /// Synthesize the next frame for the given envelope level.
    pub fn next_frame(&mut self, level: f32) -> &RgbImage {
        let alpha = blend_alpha(level, self.prev_level, &self.config);
        let frame = compose_frame(
            &self.prev_frame,
            self.base,
            self.open,
            self.region,
            self.mask,
            alpha,
        );
        self.prev_frame = frame;
        self.prev_level = level;
        &self.prev_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn fixtures() -> (RgbImage, RgbImage, PixelRect, Array2<f32>) {
        let base = RgbImage::from_pixel(20, 20, Rgb([100, 100, 100]));
        let open = RgbImage::from_pixel(20, 20, Rgb([200, 200, 200]));
        let region = PixelRect::new(5, 5, 10, 10);
        let mask = Array2::<f32>::from_elem((10, 10), 1.0);
        (base, open, region, mask)
    }

    #[test]
    fn test_alpha_below_threshold_is_zero() {
        let config = BlendConfig::default();
        assert_eq!(blend_alpha(0.0, 0.0, &config), 0.0);
        assert_eq!(blend_alpha(0.05, 0.05, &config), 0.0);
    }

    #[test]
    fn test_alpha_capped() {
        let config = BlendConfig::default();
        // A steady loud level maps to the cap, never 1.0
        let alpha = blend_alpha(1.0, 1.0, &config);
        assert!((alpha - config.alpha_cap).abs() < f32::EPSILON);
    }

    #[test]
    fn test_alpha_monotone_between_threshold_and_knee() {
        let config = BlendConfig::default();
        let a1 = blend_alpha(0.10, 0.10, &config);
        let a2 = blend_alpha(0.20, 0.20, &config);
        assert!(a1 > 0.0);
        assert!(a2 > a1);
        assert!(a2 <= config.alpha_cap);
    }

    #[test]
    fn test_onset_pop_forces_alpha() {
        let config = BlendConfig::default();
        // Slightly above threshold, but rising sharply: forced open
        let alpha = blend_alpha(0.09, 0.02, &config);
        assert!(alpha >= config.pop_alpha);

        // The same level without a sharp rise stays small
        let steady = blend_alpha(0.09, 0.09, &config);
        assert!(steady < config.pop_alpha);
    }

    #[test]
    fn test_compose_zero_alpha_restores_base_region() {
        let (base, open, region, mask) = fixtures();
        // Previous frame has an open mouth burned in
        let prev = compose_frame(&base, &base, &open, &region, &mask, 0.9);
        assert_ne!(*prev.get_pixel(10, 10), Rgb([100, 100, 100]));

        let closed = compose_frame(&prev, &base, &open, &region, &mask, 0.0);
        assert_eq!(*closed.get_pixel(10, 10), Rgb([100, 100, 100]));
    }

    #[test]
    fn test_compose_blends_from_sources_not_canvas() {
        let (base, open, region, mask) = fixtures();
        // Poison the canvas inside the region; a full blend must read from
        // open, not from the canvas
        let mut prev = base.clone();
        prev.put_pixel(10, 10, Rgb([0, 255, 0]));

        let frame = compose_frame(&prev, &base, &open, &region, &mask, 0.5);
        let px = frame.get_pixel(10, 10).0;
        // 0.5 * 100 + 0.5 * 200 = 150 on every channel
        assert_eq!(px, [150, 150, 150]);
    }

    #[test]
    fn test_compose_leaves_outside_region_untouched() {
        let (base, open, region, mask) = fixtures();
        let mut prev = base.clone();
        prev.put_pixel(0, 0, Rgb([1, 2, 3]));

        let frame = compose_frame(&prev, &base, &open, &region, &mask, 0.9);
        assert_eq!(*frame.get_pixel(0, 0), Rgb([1, 2, 3]));
    }

    #[test]
    fn test_weight_scales_with_mask() {
        let (base, open, region, _) = fixtures();
        let mut mask = Array2::<f32>::from_elem((10, 10), 1.0);
        mask[[0, 0]] = 0.2;

        let frame = compose_frame(&base, &base, &open, &region, &mask, 1.0);
        // Full weight pixel is pure open
        assert_eq!(frame.get_pixel(10, 10).0, [200, 200, 200]);
        // Low weight pixel stays near base: 0.8*100 + 0.2*200 = 120
        assert_eq!(frame.get_pixel(5, 5).0, [120, 120, 120]);
    }

    #[test]
    fn test_fold_sequence_and_identical_portraits() {
        // Pixel-identical portraits: rendering completes, frames equal base
        let base = RgbImage::from_pixel(16, 16, Rgb([80, 80, 80]));
        let open = base.clone();
        let region = PixelRect::new(4, 4, 8, 8);
        let mask = Array2::<f32>::from_elem((8, 8), 1.0);

        let mut synth = FrameSynthesizer::new(&base, &open, &region, &mask, BlendConfig::default());
        for level in [0.0, 0.5, 0.9, 0.1, 0.0] {
            let frame = synth.next_frame(level);
            assert_eq!(*frame, base);
        }
    }

    #[test]
    fn test_fold_uses_injected_previous_frame() {
        let (base, open, region, mask) = fixtures();
        // Direct compose with an arbitrary prev frame: isolated per-frame
        // testing without running the whole fold
        let arbitrary_prev = RgbImage::from_pixel(20, 20, Rgb([7, 7, 7]));
        let frame = compose_frame(&arbitrary_prev, &base, &open, &region, &mask, 0.0);
        // Outside the region the injected canvas shows through
        assert_eq!(*frame.get_pixel(0, 0), Rgb([7, 7, 7]));
        // Inside, alpha 0 yields base
        assert_eq!(*frame.get_pixel(10, 10), Rgb([100, 100, 100]));
    }
}
