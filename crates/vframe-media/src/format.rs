//! Pixel formats and rational time bases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats the pipeline negotiates between decoder, filter and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (software path)
    Yuv420p,
    /// Semi-planar YUV 4:2:0 (hardware surface layout)
    Nv12,
    Gray8,
    Rgb24,
    /// CUDA device memory
    Cuda,
    /// VA-API surface
    Vaapi,
}

impl PixelFormat {
    /// FFmpeg `pix_fmt` name.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Gray8 => "gray",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Cuda => "cuda",
            PixelFormat::Vaapi => "vaapi",
        }
    }

    pub fn from_ffmpeg_name(name: &str) -> Option<Self> {
        match name {
            "yuv420p" | "yuvj420p" => Some(PixelFormat::Yuv420p),
            "nv12" => Some(PixelFormat::Nv12),
            "gray" | "gray8" => Some(PixelFormat::Gray8),
            "rgb24" => Some(PixelFormat::Rgb24),
            "cuda" => Some(PixelFormat::Cuda),
            "vaapi" => Some(PixelFormat::Vaapi),
            _ => None,
        }
    }

    /// Whether frames of this format live in device memory.
    pub fn is_hardware(&self) -> bool {
        matches!(self, PixelFormat::Cuda | PixelFormat::Vaapi)
    }

    /// Bytes of one host-memory frame, `None` for device formats.
    pub fn frame_bytes(&self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => {
                Some(w * h + 2 * (w.div_ceil(2) * h.div_ceil(2)))
            }
            PixelFormat::Gray8 => Some(w * h),
            PixelFormat::Rgb24 => Some(w * h * 3),
            PixelFormat::Cuda | PixelFormat::Vaapi => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// A rational number `num/den`, used for time bases, frame rates and SAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Both parts positive.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// This value, or `fallback` when either part is zero or negative.
    pub fn or(self, fallback: Rational) -> Rational {
        if self.is_valid() {
            self
        } else {
            fallback
        }
    }

    pub fn invert(&self) -> Rational {
        Rational::new(self.den, self.num)
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Parse `"30000/1001"`, `"1:1"` or a plain decimal such as `"29.97"`.
    pub fn parse(s: &str) -> Option<Rational> {
        let s = s.trim();
        if let Some((num, den)) = s.split_once(['/', ':']) {
            return Some(Rational::new(num.trim().parse().ok()?, den.trim().parse().ok()?));
        }
        let value: f64 = s.parse().ok()?;
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        if value.fract() == 0.0 {
            return Some(Rational::new(value as i32, 1));
        }
        Some(Rational::new((value * 1000.0).round() as i32, 1000))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale a timestamp between time bases, rounding to nearest.
pub fn rescale_ts(ts: i64, from: Rational, to: Rational) -> i64 {
    if from == to || !from.is_valid() || !to.is_valid() {
        return ts;
    }
    let num = ts as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let half = den / 2;
    let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
    rounded as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rational() {
        assert_eq!(Rational::parse("30000/1001"), Some(Rational::new(30000, 1001)));
        assert_eq!(Rational::parse("1:1"), Some(Rational::new(1, 1)));
        assert_eq!(Rational::parse("25"), Some(Rational::new(25, 1)));
        assert!((Rational::parse("29.97").unwrap().as_f64() - 29.97).abs() < 0.001);
        assert_eq!(Rational::parse("N/A"), None);
    }

    #[test]
    fn test_invalid_rational_falls_back() {
        let tb = Rational::new(0, 1).or(Rational::new(1, 25));
        assert_eq!(tb, Rational::new(1, 25));
    }

    #[test]
    fn test_rescale_ts() {
        // 1 frame at 25 fps into a 90 kHz container clock
        assert_eq!(rescale_ts(1, Rational::new(1, 25), Rational::new(1, 90_000)), 3600);
        assert_eq!(rescale_ts(3600, Rational::new(1, 90_000), Rational::new(1, 25)), 1);
        assert_eq!(rescale_ts(7, Rational::new(1, 30), Rational::new(1, 30)), 7);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(PixelFormat::Yuv420p.frame_bytes(4, 2), Some(8 + 2 * 2));
        assert_eq!(PixelFormat::Gray8.frame_bytes(4, 2), Some(8));
        assert_eq!(PixelFormat::Cuda.frame_bytes(4, 2), None);
        assert!(PixelFormat::Cuda.is_hardware());
    }
}
