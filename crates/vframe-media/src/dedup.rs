//! Near-duplicate frame removal.
//!
//! Each frame gets a 64-bit difference hash; a frame is dropped when its
//! Hamming distance to the most recently *kept* frame is within the
//! threshold. Comparison is adjacent-window, so the pass is O(n) and only
//! removes redundant consecutive frames.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame::ExtractedFrame;
use crate::metrics;

const HASH_WIDTH: u32 = 9;
const HASH_HEIGHT: u32 = 8;

/// 64-bit difference hash.
///
/// Grayscale, resized to 9x8; bit `y * 8 + x` is set when the pixel to the
/// right is brighter.
pub fn dhash(image: &RgbImage) -> MediaResult<u64> {
    if image.width() == 0 || image.height() == 0 {
        return Err(MediaError::dedup_failed("cannot hash an empty image"));
    }
    let gray = imageops::grayscale(image);
    let small = imageops::resize(&gray, HASH_WIDTH, HASH_HEIGHT, FilterType::Triangle);

    let mut hash = 0u64;
    for y in 0..HASH_HEIGHT {
        for x in 0..HASH_WIDTH - 1 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            if right > left {
                hash |= 1u64 << (y * 8 + x);
            }
        }
    }
    Ok(hash)
}

#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Hash every frame that has no hash yet, in parallel.
///
/// Returns the number of frames that could not be hashed; those keep
/// `perceptual_hash == None`.
pub fn hash_frames(frames: &mut [ExtractedFrame]) -> usize {
    frames
        .par_iter_mut()
        .map(|frame| match frame.ensure_hash() {
            Ok(_) => 0,
            Err(e) => {
                warn!(timestamp = frame.timestamp, "Frame hash failed, keeping frame: {}", e);
                1
            }
        })
        .sum()
}

/// Result of one dedup pass.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub kept: Vec<ExtractedFrame>,
    pub removed: usize,
    /// Frames kept only because they could not be hashed
    pub unhashed: usize,
}

/// Drop frames within `threshold` bits of the last kept frame.
///
/// Order is preserved and the first frame of every near-duplicate run is
/// kept. A frame without a hash is always kept, and the frame after it is
/// kept too since there is nothing to compare against.
pub fn dedup(mut frames: Vec<ExtractedFrame>, threshold: u32) -> DedupOutcome {
    let unhashed = hash_frames(&mut frames);
    let total = frames.len();

    let mut kept: Vec<ExtractedFrame> = Vec::with_capacity(total);
    let mut last_kept: Option<u64> = None;
    for frame in frames {
        let keep = match (last_kept, frame.perceptual_hash) {
            (Some(previous), Some(current)) => hamming_distance(previous, current) > threshold,
            _ => true,
        };
        if keep {
            last_kept = frame.perceptual_hash;
            kept.push(frame);
        } else {
            debug!(timestamp = frame.timestamp, "Dropping near-duplicate frame");
        }
    }

    let removed = total - kept.len();
    metrics::record_duplicates_removed(removed);
    debug!(total, kept = kept.len(), removed, "Dedup pass complete");
    DedupOutcome {
        kept,
        removed,
        unhashed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn ramp(rightward: bool) -> RgbImage {
        RgbImage::from_fn(64, 32, |x, _| {
            let v = (if rightward { x * 4 } else { 255 - x * 4 }) as u8;
            Rgb([v, v, v])
        })
    }

    fn frame(ts: f64, image: RgbImage) -> ExtractedFrame {
        ExtractedFrame::new((ts * 30.0) as u64, ts, image)
    }

    #[test]
    fn test_dhash_direction() {
        let up = dhash(&ramp(true)).unwrap();
        let down = dhash(&ramp(false)).unwrap();
        assert_eq!(up.count_ones(), 64);
        assert_eq!(down, 0);
        assert_eq!(hamming_distance(up, down), 64);
    }

    #[test]
    fn test_dhash_empty_image_fails() {
        assert!(matches!(dhash(&RgbImage::new(0, 0)), Err(MediaError::DedupFailed(_))));
    }

    #[test]
    fn test_dedup_keeps_first_of_run() {
        let frames = vec![
            frame(0.0, ramp(true)),
            frame(1.0, ramp(true)),
            frame(2.0, ramp(false)),
            frame(3.0, ramp(false)),
            frame(4.0, ramp(true)),
        ];
        let outcome = dedup(frames, 5);
        let kept: Vec<f64> = outcome.kept.iter().map(|f| f.timestamp).collect();
        assert_eq!(kept, vec![0.0, 2.0, 4.0]);
        assert_eq!(outcome.removed, 2);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let frames = vec![
            frame(0.0, ramp(true)),
            frame(1.0, ramp(false)),
            frame(2.0, ramp(false)),
            frame(3.0, ramp(true)),
        ];
        let once = dedup(frames, 5).kept;
        let twice = dedup(once.clone(), 5).kept;
        assert_eq!(once.len(), twice.len());
        assert!(once.iter().zip(&twice).all(|(a, b)| a.timestamp == b.timestamp));
    }

    #[test]
    fn test_unhashable_frames_are_kept() {
        let frames = vec![
            frame(0.0, ramp(true)),
            frame(1.0, RgbImage::new(0, 0)),
            frame(2.0, ramp(true)),
        ];
        let outcome = dedup(frames, 5);
        assert_eq!(outcome.kept.len(), 3);
        assert_eq!(outcome.unhashed, 1);
    }
}
