//! End-to-end tests of the pure pipeline stages (no FFmpeg required):
//! portraits -> region -> harmonize -> mask -> envelope -> frame fold.

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use liptalk_media::envelope::EnvelopeConfig;
use liptalk_media::landmarks::{FaceLandmarker, LandmarkPoint, MESH_POINT_COUNT};
use liptalk_media::region::RegionSource;
use liptalk_media::synth::{BlendConfig, FrameSynthesizer};
use liptalk_media::{
    build_blend_mask, harmonize_open_portrait, locate_mouth_region, synthetic_envelope,
    PortraitPair, RenderResult,
};
use liptalk_models::{EnvelopeOrigin, RegionOrigin};

/// Detector stub producing a plausible lower-face landmark layout.
struct FixedLandmarker;

impl FaceLandmarker for FixedLandmarker {
    fn detect(&self, image: &RgbImage) -> RenderResult<Vec<LandmarkPoint>> {
        let w = image.width() as f32;
        let h = image.height() as f32;
        Ok((0..MESH_POINT_COUNT)
            .map(|i| LandmarkPoint {
                x: w * 0.5 + ((i % 13) as f32 - 6.0) * w * 0.02,
                y: h * 0.68 + ((i % 7) as f32) * h * 0.02,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

fn write_portraits(dir: &TempDir, w: u32, h: u32) -> (std::path::PathBuf, std::path::PathBuf) {
    let base_path = dir.path().join("base.png");
    let open_path = dir.path().join("open.png");

    let base = RgbImage::from_pixel(w, h, Rgb([180, 150, 130]));
    let mut open = base.clone();
    // A darker open-mouth patch in the lower middle
    for y in (h * 6 / 10)..(h * 8 / 10) {
        for x in (w * 4 / 10)..(w * 6 / 10) {
            open.put_pixel(x, y, Rgb([60, 30, 30]));
        }
    }

    base.save(&base_path).unwrap();
    open.save(&open_path).unwrap();
    (base_path, open_path)
}

#[test]
fn preprocessed_portraits_always_share_dimensions() {
    let dir = TempDir::new().unwrap();
    let base_path = dir.path().join("base.png");
    let open_path = dir.path().join("open.png");
    RgbImage::from_pixel(120, 90, Rgb([10, 20, 30]))
        .save(&base_path)
        .unwrap();
    RgbImage::from_pixel(77, 301, Rgb([40, 50, 60]))
        .save(&open_path)
        .unwrap();

    let pair = PortraitPair::load(&base_path, &open_path).unwrap();
    assert_eq!(pair.base.dimensions(), pair.open.dimensions());
    assert_eq!(pair.base.dimensions(), (120, 90));
}

#[test]
fn region_locator_never_fails_without_model() {
    for (w, h) in [(64u32, 64u32), (320, 240), (5, 9)] {
        let img = RgbImage::new(w, h);
        let region = locate_mouth_region(None, &img);
        assert!(region.rect.is_valid_within(w, h), "invalid region for {w}x{h}");
        assert_eq!(region.source.origin(), RegionOrigin::Heuristic);
    }
}

#[test]
fn full_pure_pipeline_no_audio_five_seconds() {
    let dir = TempDir::new().unwrap();
    let (base_path, open_path) = write_portraits(&dir, 100, 100);

    let mut pair = PortraitPair::load(&base_path, &open_path).unwrap();

    let detector = FixedLandmarker;
    let region = locate_mouth_region(Some(&detector), &pair.base);
    assert_eq!(region.source.origin(), RegionOrigin::Landmarks);
    assert!(region.rect.is_valid_within(100, 100));

    harmonize_open_portrait(&mut pair, &region);
    let mask = build_blend_mask(&pair.base, &pair.open, &region);
    assert_eq!(
        mask.dim(),
        (region.rect.height as usize, region.rect.width as usize)
    );

    // 5-second request at 30fps with no audio: exactly 150 frames
    let envelope = synthetic_envelope(5.0, 30, &EnvelopeConfig::default());
    assert_eq!(envelope.len(), 150);
    assert_eq!(envelope.origin, EnvelopeOrigin::Synthetic);

    let mut synthesizer = FrameSynthesizer::new(
        &pair.base,
        &pair.open,
        &region.rect,
        &mask,
        BlendConfig::default(),
    );

    let mut frames = 0usize;
    for &level in &envelope.values {
        let frame = synthesizer.next_frame(level);
        assert_eq!(frame.dimensions(), (100, 100));
        frames += 1;
    }
    assert_eq!(frames, 150);
}

#[test]
fn identical_portraits_render_without_motion() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("same.png");
    RgbImage::from_pixel(80, 80, Rgb([140, 120, 110]))
        .save(&path)
        .unwrap();

    let mut pair = PortraitPair::load(&path, &path).unwrap();
    let detector = FixedLandmarker;
    let region = locate_mouth_region(Some(&detector), &pair.base);

    harmonize_open_portrait(&mut pair, &region);

    // No pixel difference: the mask builder must still yield a usable
    // fallback mask
    let mask = build_blend_mask(&pair.base, &pair.open, &region);
    assert!(mask.iter().any(|&v| v > 0.0), "fallback mask is empty");
    assert!(mask.iter().all(|&v| (0.0..=1.0).contains(&v)));

    // Rendering completes; color harmonization may shift the open portrait
    // by rounding, so "no visible motion" means every frame stays within
    // one count of the base on every channel
    let envelope = synthetic_envelope(1.0, 30, &EnvelopeConfig::default());
    let mut synthesizer = FrameSynthesizer::new(
        &pair.base,
        &pair.open,
        &region.rect,
        &mask,
        BlendConfig::default(),
    );
    for &level in &envelope.values {
        let frame = synthesizer.next_frame(level);
        for (p, b) in frame.pixels().zip(pair.base.pixels()) {
            for c in 0..3 {
                assert!((p.0[c] as i16 - b.0[c] as i16).abs() <= 1);
            }
        }
    }
}

#[test]
fn mask_identical_inputs_identical_outputs() {
    let dir = TempDir::new().unwrap();
    let (base_path, open_path) = write_portraits(&dir, 90, 90);
    let pair = PortraitPair::load(&base_path, &open_path).unwrap();

    let detector = FixedLandmarker;
    let region = locate_mouth_region(Some(&detector), &pair.base);

    let first = build_blend_mask(&pair.base, &pair.open, &region);
    let second = build_blend_mask(&pair.base, &pair.open, &region);
    assert_eq!(first, second);
}

#[test]
fn landmark_region_carries_points() {
    let img = RgbImage::new(128, 128);
    let detector = FixedLandmarker;
    let region = locate_mouth_region(Some(&detector), &img);
    match region.source {
        RegionSource::Landmarks(ref points) => assert!(!points.is_empty()),
        RegionSource::Heuristic => panic!("expected landmark source"),
    }
}
