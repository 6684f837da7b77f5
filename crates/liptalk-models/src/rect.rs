use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// X coordinate of the top-left corner
    pub x: u32,
    /// Y coordinate of the top-left corner
    pub y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl PixelRect {
    /// Create a new rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check that the rectangle has positive area and lies fully inside an
    /// image of the given dimensions.
    pub fn is_valid_within(&self, image_width: u32, image_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= image_width
            && self.bottom() <= image_height
    }

    /// Build a rectangle from possibly out-of-range float bounds, clipping
    /// to an image of the given dimensions. Returns `None` when the clipped
    /// rectangle would be empty.
    pub fn from_bounds_clipped(
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let x0 = min_x.max(0.0).floor() as u32;
        let y0 = min_y.max(0.0).floor() as u32;
        let x1 = (max_x.ceil() as i64).clamp(0, image_width as i64) as u32;
        let y1 = (max_y.ceil() as i64).clamp(0, image_height as i64) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }
}
