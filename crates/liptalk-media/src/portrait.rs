//! Portrait loading and dimension normalization.

use std::path::Path;

use image::{imageops, RgbImage};
use liptalk_models::PixelRect;
use tracing::warn;

use crate::error::{RenderError, RenderResult};

/// The two source portraits: closed mouth (base) and open mouth.
///
/// After `load`, both buffers have identical dimensions. `base` is never
/// modified; `open` is replaced once by its color-harmonized copy.
#[derive(Debug, Clone)]
pub struct PortraitPair {
    pub base: RgbImage,
    pub open: RgbImage,
}

impl PortraitPair {
    /// Load both portraits, resizing the open-mouth image to the base
    /// image's dimensions when they differ.
    ///
    /// An unreadable image is the only unconditionally fatal input error.
    pub fn load(base_path: &Path, open_path: &Path) -> RenderResult<Self> {
        let base = load_rgb(base_path)?;
        let mut open = load_rgb(open_path)?;

        if open.dimensions() != base.dimensions() {
            warn!(
                base = ?base.dimensions(),
                open = ?open.dimensions(),
                "Portrait dimensions differ, resizing open-mouth image to match"
            );
            open = imageops::resize(
                &open,
                base.width(),
                base.height(),
                imageops::FilterType::Lanczos3,
            );
        }

        Ok(Self { base, open })
    }

    pub fn width(&self) -> u32 {
        self.base.width()
    }

    pub fn height(&self) -> u32 {
        self.base.height()
    }
}

fn load_rgb(path: &Path) -> RenderResult<RgbImage> {
    let img = image::open(path).map_err(|e| RenderError::image_load(path, e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Copy the pixels of `rect` out of an image.
///
/// The rectangle must already be clipped to the image bounds.
pub(crate) fn crop_rgb(img: &RgbImage, rect: &PixelRect) -> RgbImage {
    let mut out = RgbImage::new(rect.width, rect.height);
    for y in 0..rect.height {
        for x in 0..rect.width {
            out.put_pixel(x, y, *img.get_pixel(rect.x + x, rect.y + y));
        }
    }
    out
}

/// Write `patch` back into `img` at `rect`'s position.
pub(crate) fn paste_rgb(img: &mut RgbImage, patch: &RgbImage, rect: &PixelRect) {
    debug_assert_eq!(patch.dimensions(), (rect.width, rect.height));
    for y in 0..rect.height {
        for x in 0..rect.width {
            img.put_pixel(rect.x + x, rect.y + y, *patch.get_pixel(x, y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, w: u32, h: u32, color: [u8; 3]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let img = RgbImage::from_pixel(w, h, Rgb(color));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_equal_dimensions() {
        let dir = TempDir::new().unwrap();
        let base = write_png(&dir, "base.png", 64, 48, [200, 150, 120]);
        let open = write_png(&dir, "open.png", 64, 48, [190, 140, 110]);

        let pair = PortraitPair::load(&base, &open).unwrap();
        assert_eq!(pair.base.dimensions(), pair.open.dimensions());
    }

    #[test]
    fn test_load_resizes_open_to_base() {
        let dir = TempDir::new().unwrap();
        let base = write_png(&dir, "base.png", 64, 48, [200, 150, 120]);
        let open = write_png(&dir, "open.png", 32, 100, [190, 140, 110]);

        let pair = PortraitPair::load(&base, &open).unwrap();
        assert_eq!(pair.open.dimensions(), (64, 48));
        assert_eq!(pair.base.dimensions(), pair.open.dimensions());
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let base = write_png(&dir, "base.png", 8, 8, [0, 0, 0]);
        let err = PortraitPair::load(&base, &dir.path().join("missing.png")).unwrap_err();
        assert!(matches!(err, RenderError::ImageLoad { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_crop_and_paste_roundtrip() {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([1, 2, 3]));
        img.put_pixel(4, 5, Rgb([9, 9, 9]));

        let rect = PixelRect::new(2, 3, 5, 4);
        let crop = crop_rgb(&img, &rect);
        assert_eq!(crop.dimensions(), (5, 4));
        assert_eq!(*crop.get_pixel(2, 2), Rgb([9, 9, 9]));

        let mut target = RgbImage::new(10, 10);
        paste_rgb(&mut target, &crop, &rect);
        assert_eq!(*target.get_pixel(4, 5), Rgb([9, 9, 9]));
        assert_eq!(*target.get_pixel(0, 0), Rgb([0, 0, 0]));
    }
}
