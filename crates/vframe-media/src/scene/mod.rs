//! Scene frame extraction.
//!
//! One representative frame per detected scene, or fixed-interval frames
//! when the clip has fewer scenes than `min_frames`. The strategies are
//! never mixed for one video.
//!
//! Every candidate frame has any remaining uniform border trimmed off, and
//! candidates that are solid colour or near-mono are passed over in favour
//! of the next candidate of the same slot.

mod detector;
pub mod output;
mod sampling;

pub use detector::{SceneDetector, SceneDetectorConfig, SceneScorer};
pub use output::{clear_frames, write_frames, write_manifest, MANIFEST_FILE};
pub use sampling::{
    fixed_interval_count, fixed_interval_slots, fixed_interval_timestamps, scene_slots, SampleSlot,
};

use image::{imageops, RgbImage};
use std::path::Path;
use tracing::{debug, info, warn};
use vframe_models::{SamplingStrategy, SceneSegment, TuningConfig};

use crate::border::uniform_scan;
use crate::error::{MediaError, MediaResult};
use crate::frame::{is_near_mono, is_solid_color, ExtractedFrame, GrayFrame};
use crate::metrics;
use crate::probe::VideoInfo;
use crate::sampler::FrameSampler;

/// Scene extraction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneParams {
    pub min_frames: usize,
    pub sample_fps: f64,
    /// Per-channel standard deviation under which a frame is solid colour;
    /// also the luma deviation under which it is near-mono
    pub solid_std_threshold: f64,
    /// Max deviation for a border line trimmed off a sampled frame
    pub tolerance: u8,
    pub detector: SceneDetectorConfig,
}

impl From<&TuningConfig> for SceneParams {
    fn from(tuning: &TuningConfig) -> Self {
        Self {
            min_frames: tuning.min_frames,
            sample_fps: tuning.sample_fps,
            solid_std_threshold: tuning.solid_std_threshold,
            tolerance: tuning.tolerance,
            detector: SceneDetectorConfig {
                threshold: tuning.scene_threshold,
                ..Default::default()
            },
        }
    }
}

impl Default for SceneParams {
    fn default() -> Self {
        Self::from(&TuningConfig::default())
    }
}

/// Frames sampled from one clip, in chronological order.
#[derive(Debug, Clone)]
pub struct SceneExtraction {
    pub strategy: SamplingStrategy,
    /// Detected scenes (empty when scene analysis failed)
    pub segments: Vec<SceneSegment>,
    pub frames: Vec<ExtractedFrame>,
    /// Candidates rejected as solid colour or near-mono
    pub solid_skipped: usize,
    /// Kept frames that had an inner border trimmed
    pub trimmed: usize,
    /// Slots that produced no usable frame
    pub empty_slots: usize,
}

/// Samples representative frames through a [`FrameSampler`].
pub struct SceneExtractor<'a> {
    sampler: &'a dyn FrameSampler,
    params: SceneParams,
}

impl<'a> SceneExtractor<'a> {
    pub fn new(sampler: &'a dyn FrameSampler, params: SceneParams) -> Self {
        Self { sampler, params }
    }

    /// Sample frames from `path`.
    ///
    /// Scene analysis errors fall back to fixed-interval sampling. Fails with
    /// `SourceUnreadable` when the clip cannot be probed and with
    /// `SceneDetectionFailed` when no usable frame was found at all.
    pub fn extract(&self, path: &Path) -> MediaResult<SceneExtraction> {
        let info = self
            .sampler
            .probe(path)
            .map_err(|e| MediaError::source_unreadable(path, e.reason()))?;
        if info.duration <= 0.0 || info.width == 0 || info.height == 0 {
            return Err(MediaError::source_unreadable(path, "clip has no duration or dimensions"));
        }

        let segments = match self.detect_scenes(path, &info) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    "Scene detection failed, using fixed-interval sampling: {}",
                    e.reason()
                );
                metrics::record_scene_fallback();
                Vec::new()
            }
        };

        let (strategy, slots) = if segments.len() >= self.params.min_frames.max(1) {
            (SamplingStrategy::SceneMidpoints, scene_slots(&segments))
        } else {
            debug!(
                scenes = segments.len(),
                min_frames = self.params.min_frames,
                "Too few scenes, using fixed-interval sampling"
            );
            (
                SamplingStrategy::FixedInterval,
                fixed_interval_slots(info.duration, self.params.sample_fps, self.params.min_frames.max(1)),
            )
        };

        let mut extraction = SceneExtraction {
            strategy,
            segments,
            frames: Vec::with_capacity(slots.len()),
            solid_skipped: 0,
            trimmed: 0,
            empty_slots: 0,
        };
        for slot in &slots {
            match self.sample_slot(path, &info, slot, &mut extraction) {
                Some(frame) => extraction.frames.push(frame),
                None => extraction.empty_slots += 1,
            }
        }

        if extraction.frames.is_empty() {
            return Err(MediaError::scene_detection_failed(format!(
                "no usable frame in {} slots",
                slots.len()
            )));
        }
        let label = strategy_label(strategy);
        metrics::record_frames_extracted(label, extraction.frames.len());
        info!(
            path = %path.display(),
            strategy = label,
            scenes = extraction.segments.len(),
            frames = extraction.frames.len(),
            solid_skipped = extraction.solid_skipped,
            trimmed = extraction.trimmed,
            "Extracted frames"
        );
        Ok(extraction)
    }

    fn detect_scenes(&self, path: &Path, info: &VideoInfo) -> MediaResult<Vec<SceneSegment>> {
        let config = self.params.detector;
        let (width, height) = config.analysis_size(info.width, info.height);
        let mut detector = SceneDetector::new(config);
        self.sampler
            .scan_gray(path, config.analysis_fps, width, height, &mut |ts, frame| {
                detector.push(ts, frame);
                Ok(())
            })?;
        if detector.frames_seen() == 0 {
            return Err(MediaError::scene_detection_failed("scan produced no frames"));
        }
        Ok(detector.finish(info.duration))
    }

    /// First usable candidate of `slot`.
    fn sample_slot(
        &self,
        path: &Path,
        info: &VideoInfo,
        slot: &SampleSlot,
        extraction: &mut SceneExtraction,
    ) -> Option<ExtractedFrame> {
        let threshold = self.params.solid_std_threshold;
        for timestamp in slot.candidates() {
            let image = match self.sampler.rgb_frame_at(path, timestamp) {
                Ok(image) => image,
                Err(e) => {
                    debug!(timestamp, "Frame unavailable: {}", e.reason());
                    continue;
                }
            };
            if is_solid_color(&image, threshold) {
                extraction.solid_skipped += 1;
                debug!(timestamp, "Skipping solid-colour frame");
                continue;
            }
            let Some((image, trimmed)) = trim_inner_border(image, self.params.tolerance) else {
                extraction.solid_skipped += 1;
                debug!(timestamp, "Skipping uniform frame");
                continue;
            };
            if is_solid_color(&image, threshold) || is_near_mono(&image, threshold) {
                extraction.solid_skipped += 1;
                debug!(timestamp, "Skipping near-mono frame");
                continue;
            }
            if trimmed {
                extraction.trimmed += 1;
                debug!(timestamp, width = image.width(), height = image.height(), "Trimmed inner border");
            }
            return Some(ExtractedFrame::new(info.frame_index_at(timestamp), timestamp, image));
        }
        None
    }
}

/// Cut away uniform rows and columns around the content.
///
/// Returns the image and whether anything was trimmed, or `None` when the
/// whole frame is uniform.
fn trim_inner_border(image: RgbImage, tolerance: u8) -> Option<(RgbImage, bool)> {
    let (width, height) = image.dimensions();
    let edges = uniform_scan(&GrayFrame::from_rgb(&image), tolerance)?;
    if edges.is_empty() {
        return None;
    }
    if edges.width() == width && edges.height() == height {
        return Some((image, false));
    }
    let inner = imageops::crop_imm(&image, edges.left, edges.top, edges.width(), edges.height()).to_image();
    Some((inner, true))
}

fn strategy_label(strategy: SamplingStrategy) -> &'static str {
    match strategy {
        SamplingStrategy::SceneMidpoints => "scene_midpoints",
        SamplingStrategy::FixedInterval => "fixed_interval",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_tuning() {
        let tuning = TuningConfig {
            scene_threshold: 0.3,
            min_frames: 6,
            ..Default::default()
        };
        let params = SceneParams::from(&tuning);
        assert_eq!(params.min_frames, 6);
        assert_eq!(params.tolerance, tuning.tolerance);
        assert_eq!(params.detector.threshold, 0.3);
        assert_eq!(params.detector.analysis_width, 160);
    }

    #[test]
    fn test_trim_inner_border() {
        use image::Rgb;

        let boxed = RgbImage::from_fn(40, 30, |x, y| {
            let inside = (6..34).contains(&x) && (4..26).contains(&y);
            match (inside, (x + y) % 2 == 0) {
                (false, _) => Rgb([0, 0, 0]),
                (true, true) => Rgb([200, 40, 40]),
                (true, false) => Rgb([30, 30, 180]),
            }
        });
        let (inner, trimmed) = trim_inner_border(boxed, 5).unwrap();
        assert!(trimmed);
        assert_eq!(inner.dimensions(), (28, 22));
        assert_eq!(inner.get_pixel(0, 0), &Rgb([200, 40, 40]));

        let (same, trimmed) = trim_inner_border(inner.clone(), 5).unwrap();
        assert!(!trimmed);
        assert_eq!(same, inner);

        assert!(trim_inner_border(RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])), 5).is_none());
    }
}
