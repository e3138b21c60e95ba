//! Crop rectangle in source pixel coordinates.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reasons a crop rectangle is not usable for a given source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CropRectError {
    #[error("crop rectangle is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error("crop {rect} exceeds source bounds {source_width}x{source_height}")]
    OutOfBounds {
        rect: CropRect,
        source_width: u32,
        source_height: u32,
    },

    #[error("crop {rect} is smaller than {min_ratio:.2} of {source_width}x{source_height}")]
    TooSmall {
        rect: CropRect,
        source_width: u32,
        source_height: u32,
        min_ratio: f64,
    },
}

/// Axis-aligned crop rectangle.
///
/// `x`/`y` are the top-left corner; `width`/`height` the extent. A valid
/// rectangle satisfies `x + width <= source_width` and
/// `y + height <= source_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The no-op crop covering the whole frame.
    pub fn full_frame(source_width: u32, source_height: u32) -> Self {
        Self::new(0, 0, source_width, source_height)
    }

    /// Build from exclusive edges (`right`/`bottom` are one past the last pixel).
    pub fn from_edges(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self::new(
            left,
            top,
            right.saturating_sub(left),
            bottom.saturating_sub(top),
        )
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_full_frame(&self, source_width: u32, source_height: u32) -> bool {
        *self == Self::full_frame(source_width, source_height)
    }

    /// Whether the rectangle lies inside a `source_width x source_height` frame.
    pub fn fits_within(&self, source_width: u32, source_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= source_width
            && self.bottom() <= source_height
    }

    /// Check bounds and the minimum size ratio against a source frame.
    pub fn validate(
        &self,
        source_width: u32,
        source_height: u32,
        min_ratio: f64,
    ) -> Result<(), CropRectError> {
        if self.width == 0 || self.height == 0 {
            return Err(CropRectError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if !self.fits_within(source_width, source_height) {
            return Err(CropRectError::OutOfBounds {
                rect: *self,
                source_width,
                source_height,
            });
        }
        let min_w = min_ratio * source_width as f64;
        let min_h = min_ratio * source_height as f64;
        if (self.width as f64) < min_w || (self.height as f64) < min_h {
            return Err(CropRectError::TooSmall {
                rect: *self,
                source_width,
                source_height,
                min_ratio,
            });
        }
        Ok(())
    }

    /// Clamp the rectangle into a `source_width x source_height` frame.
    pub fn clamped(&self, source_width: u32, source_height: u32) -> Self {
        let x = self.x.min(source_width.saturating_sub(1));
        let y = self.y.min(source_height.saturating_sub(1));
        let right = self.right().min(source_width).max(x + 1);
        let bottom = self.bottom().min(source_height).max(y + 1);
        Self::from_edges(x, y, right, bottom)
    }

    /// Align offsets and dimensions to even values for 4:2:0 chroma.
    ///
    /// Offsets round down and dimensions shrink, so the result never grows
    /// past the original right/bottom edges.
    pub fn aligned_even(&self) -> Self {
        let x = self.x & !1;
        let y = self.y & !1;
        let width = (self.right() - x) & !1;
        let height = (self.bottom() - y) & !1;
        Self::new(x, y, width.max(2), height.max(2))
    }

    /// FFmpeg `crop` filter argument with named options.
    pub fn to_filter_arg(&self) -> String {
        format!(
            "crop=w={}:h={}:x={}:y={}",
            self.width, self.height, self.x, self.y
        )
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_is_valid() {
        let rect = CropRect::full_frame(1920, 1080);
        assert!(rect.is_full_frame(1920, 1080));
        assert!(rect.validate(1920, 1080, 0.10).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let rect = CropRect::new(100, 0, 1900, 1080);
        assert!(matches!(
            rect.validate(1920, 1080, 0.10),
            Err(CropRectError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_tiny_crop() {
        let rect = CropRect::new(0, 0, 100, 1080);
        assert!(matches!(
            rect.validate(1920, 1080, 0.10),
            Err(CropRectError::TooSmall { .. })
        ));
        assert!(matches!(
            CropRect::new(0, 0, 0, 10).validate(1920, 1080, 0.10),
            Err(CropRectError::Empty { .. })
        ));
    }

    #[test]
    fn test_aligned_even_stays_inside() {
        let rect = CropRect::new(21, 13, 1877, 1053);
        let aligned = rect.aligned_even();
        assert_eq!(aligned.x % 2, 0);
        assert_eq!(aligned.y % 2, 0);
        assert_eq!(aligned.width % 2, 0);
        assert_eq!(aligned.height % 2, 0);
        assert!(aligned.right() <= rect.right());
        assert!(aligned.bottom() <= rect.bottom());
        assert!(aligned.fits_within(1920, 1080));
    }

    #[test]
    fn test_clamped() {
        let rect = CropRect::new(10, 10, 5000, 5000).clamped(640, 360);
        assert_eq!(rect, CropRect::new(10, 10, 630, 350));
    }

    #[test]
    fn test_filter_arg() {
        let rect = CropRect::new(20, 20, 600, 320);
        assert_eq!(rect.to_filter_arg(), "crop=w=600:h=320:x=20:y=20");
        assert_eq!(rect.to_string(), "600x320+20+20");
    }
}
