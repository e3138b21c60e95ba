//! Decoded frame buffers used by detection, sampling and dedup.

use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use vframe_models::FrameRecord;

use crate::dedup::dhash;
use crate::error::{MediaError, MediaResult};

/// 8-bit grayscale frame, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(MediaError::InvalidVideo(format!(
                "gray frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a frame from a per-pixel function.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.data[start..start + self.width as usize]
    }

    pub fn column(&self, x: u32) -> Vec<u8> {
        (0..self.height).map(|y| self.get(x, y)).collect()
    }

    /// BT.601 luma of an RGB image.
    pub fn from_rgb(image: &RgbImage) -> Self {
        let data = image.pixels().map(|p| luma(p.0)).collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }
}

#[inline]
fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// One sampled frame on its way from the extractor to the embedding handoff.
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    /// 1-based position in the final set (0 until written)
    pub sequence: usize,
    pub frame_index: u64,
    /// Seconds from the start of the clip
    pub timestamp: f64,
    pub image: Arc<RgbImage>,
    pub perceptual_hash: Option<u64>,
    /// Set once the image is written to disk
    pub path: Option<PathBuf>,
}

impl ExtractedFrame {
    pub fn new(frame_index: u64, timestamp: f64, image: RgbImage) -> Self {
        Self {
            sequence: 0,
            frame_index,
            timestamp,
            image: Arc::new(image),
            perceptual_hash: None,
            path: None,
        }
    }

    /// Hash the image on first use.
    pub fn ensure_hash(&mut self) -> MediaResult<u64> {
        if let Some(hash) = self.perceptual_hash {
            return Ok(hash);
        }
        let hash = dhash(&self.image)?;
        self.perceptual_hash = Some(hash);
        Ok(hash)
    }

    /// Handoff record; `None` until the frame has been written.
    pub fn to_record(&self) -> Option<FrameRecord> {
        let path = self.path.clone()?;
        Some(FrameRecord {
            sequence: self.sequence,
            frame_index: self.frame_index,
            timestamp: self.timestamp,
            path,
            perceptual_hash: self.perceptual_hash,
        })
    }
}

/// Whether every channel's standard deviation is below `threshold`.
pub fn is_solid_color(image: &RgbImage, threshold: f64) -> bool {
    let pixels = image.width() as f64 * image.height() as f64;
    if pixels == 0.0 {
        return true;
    }
    let mut sum = [0f64; 3];
    let mut sum_sq = [0f64; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            let v = pixel.0[c] as f64;
            sum[c] += v;
            sum_sq[c] += v * v;
        }
    }
    (0..3).all(|c| {
        let mean = sum[c] / pixels;
        let variance = (sum_sq[c] / pixels - mean * mean).max(0.0);
        variance.sqrt() < threshold
    })
}

/// Whether the luma standard deviation is below `threshold`.
///
/// Catches frames whose colour varies while brightness does not, which
/// [`is_solid_color`] lets through.
pub fn is_near_mono(image: &RgbImage, threshold: f64) -> bool {
    let pixels = image.width() as f64 * image.height() as f64;
    if pixels == 0.0 {
        return true;
    }
    let (sum, sum_sq) = image.pixels().fold((0f64, 0f64), |(sum, sum_sq), p| {
        let v = luma(p.0) as f64;
        (sum + v, sum_sq + v * v)
    });
    let mean = sum / pixels;
    (sum_sq / pixels - mean * mean).max(0.0).sqrt() < threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_gray_frame_layout() {
        let frame = GrayFrame::from_fn(3, 2, |x, y| (y * 10 + x) as u8);
        assert_eq!(frame.get(2, 1), 12);
        assert_eq!(frame.row(1), &[10, 11, 12]);
        assert_eq!(frame.column(0), vec![0, 10]);
    }

    #[test]
    fn test_gray_frame_rejects_short_buffer() {
        assert!(GrayFrame::new(4, 4, vec![0; 15]).is_err());
        assert!(GrayFrame::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn test_solid_color() {
        let black = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
        assert!(is_solid_color(&black, 4.0));

        let stripes = RgbImage::from_fn(16, 16, |x, _| if x % 2 == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        assert!(!is_solid_color(&stripes, 4.0));
    }

    #[test]
    fn test_equal_luma_colours_are_near_mono() {
        // Pure red and a mid green share a luma of 76.
        let checker = RgbImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 130, 0]) }
        });
        assert!(!is_solid_color(&checker, 4.0));
        assert!(is_near_mono(&checker, 4.0));
        assert!(GrayFrame::from_rgb(&checker).data().iter().all(|&v| v == 76));

        let stripes = RgbImage::from_fn(16, 16, |x, _| if x % 2 == 0 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        assert!(!is_near_mono(&stripes, 4.0));
    }

    #[test]
    fn test_record_requires_path() {
        let mut frame = ExtractedFrame::new(30, 1.0, RgbImage::new(8, 8));
        assert!(frame.to_record().is_none());
        frame.sequence = 1;
        frame.path = Some(PathBuf::from("/out/1_1.00.png"));
        let record = frame.to_record().unwrap();
        assert_eq!(record.sequence, 1);
        assert_eq!(record.frame_index, 30);
    }
}
