//! Scene boundary detection over a low-resolution grayscale scan.
//!
//! # Algorithm
//! 1. Decode the clip at `analysis_fps` as small grayscale frames
//! 2. Score each frame against the previous one like FFmpeg's `select`
//!    scene score: mean absolute frame difference as a percentage of the
//!    8-bit range, limited by its change from the previous difference
//! 3. Declare a cut where the score exceeds the threshold, debounced by
//!    `min_scene_secs`
//! 4. Cuts split `[0, duration]` into contiguous segments

use tracing::debug;
use vframe_models::SceneSegment;

use crate::frame::GrayFrame;

/// Configuration for scene detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneDetectorConfig {
    /// Score above which a frame opens a new scene (0.0-1.0)
    pub threshold: f64,

    /// Minimum distance between two cuts, in seconds
    pub min_scene_secs: f64,

    /// Width of the analysis frames; height follows the aspect ratio
    pub analysis_width: u32,

    /// Analysis frame rate
    pub analysis_fps: f64,
}

impl Default for SceneDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: vframe_models::DEFAULT_SCENE_THRESHOLD,
            min_scene_secs: 0.5,
            analysis_width: 160,
            analysis_fps: 4.0,
        }
    }
}

impl SceneDetectorConfig {
    /// Analysis frame size for a `width x height` source, both even.
    pub fn analysis_size(&self, width: u32, height: u32) -> (u32, u32) {
        let even = |v: u32| (v.max(2) / 2) * 2;
        let w = even(self.analysis_width.min(width.max(2)));
        let h = if width == 0 {
            w
        } else {
            (w as f64 * height as f64 / width as f64).round() as u32
        };
        (w, even(h))
    }
}

/// Frame-to-frame scene score.
#[derive(Debug, Default)]
pub struct SceneScorer {
    previous: Option<GrayFrame>,
    prev_mafd: f64,
}

impl SceneScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `frame` against the previous one; the first frame scores 0.
    pub fn score(&mut self, frame: &GrayFrame) -> f64 {
        let score = match &self.previous {
            Some(prev) if prev.width() == frame.width() && prev.height() == frame.height() => {
                let sad: u64 = prev
                    .data()
                    .iter()
                    .zip(frame.data())
                    .map(|(&a, &b)| a.abs_diff(b) as u64)
                    .sum();
                let pixels = frame.width() as f64 * frame.height() as f64;
                let mafd = sad as f64 * 100.0 / (pixels * 255.0);
                let diff = (mafd - self.prev_mafd).abs();
                self.prev_mafd = mafd;
                (mafd.min(diff) / 100.0).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        self.previous = Some(frame.clone());
        score
    }
}

/// Streaming cut detector.
///
/// # Usage
///
/// ```ignore
/// let mut detector = SceneDetector::new(config);
/// sampler.scan_gray(path, fps, w, h, &mut |ts, frame| {
///     detector.push(ts, frame);
///     Ok(())
/// })?;
/// let segments = detector.finish(duration);
/// ```
#[derive(Debug)]
pub struct SceneDetector {
    config: SceneDetectorConfig,
    scorer: SceneScorer,
    /// `(timestamp, score)` of each accepted cut
    cuts: Vec<(f64, f64)>,
    last_cut: f64,
    last_timestamp: Option<f64>,
    frames: u64,
}

impl SceneDetector {
    pub fn new(config: SceneDetectorConfig) -> Self {
        Self {
            config,
            scorer: SceneScorer::new(),
            cuts: Vec::new(),
            last_cut: 0.0,
            last_timestamp: None,
            frames: 0,
        }
    }

    /// Feed the next analysis frame. Returns `true` when it opens a scene.
    pub fn push(&mut self, timestamp: f64, frame: &GrayFrame) -> bool {
        self.frames += 1;
        self.last_timestamp = Some(timestamp);
        let score = self.scorer.score(frame);
        if score <= self.config.threshold || timestamp - self.last_cut < self.config.min_scene_secs {
            return false;
        }
        debug!(timestamp, score, "Scene cut");
        self.cuts.push((timestamp, score));
        self.last_cut = timestamp;
        true
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames
    }

    pub fn cut_count(&self) -> usize {
        self.cuts.len()
    }

    /// Segments tiling `[0, duration]`.
    ///
    /// A non-positive `duration` is replaced by the end of the last
    /// analysis frame. No frames at all yields no segments.
    pub fn finish(self, duration: f64) -> Vec<SceneSegment> {
        let Some(last) = self.last_timestamp else {
            return Vec::new();
        };
        let end = if duration > 0.0 {
            duration
        } else {
            last + 1.0 / self.config.analysis_fps.max(f64::EPSILON)
        };

        let mut segments = Vec::with_capacity(self.cuts.len() + 1);
        let mut start = 0.0;
        let mut score = 0.0;
        for (cut, cut_score) in self.cuts.into_iter().filter(|(t, _)| *t > 0.0 && *t < end) {
            segments.push(SceneSegment::new(start, cut, score));
            start = cut;
            score = cut_score;
        }
        segments.push(SceneSegment::new(start, end, score));
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(level: u8) -> GrayFrame {
        GrayFrame::from_fn(16, 8, |_, _| level)
    }

    fn stripes(phase: u32) -> GrayFrame {
        GrayFrame::from_fn(16, 8, |x, _| if (x + phase) % 4 < 2 { 20 } else { 220 })
    }

    #[test]
    fn test_scorer_matches_scene_score() {
        let mut scorer = SceneScorer::new();
        assert_eq!(scorer.score(&flat(10)), 0.0);
        // mafd 51 levels = 20%, previous mafd 0
        assert!((scorer.score(&flat(61)) - 0.2).abs() < 1e-9);
        // Same change again: diff of mafds is 0
        assert_eq!(scorer.score(&flat(112)), 0.0);
        assert_eq!(scorer.score(&flat(112)), 0.0);
    }

    #[test]
    fn test_small_uniform_shift_stays_below_default_threshold() {
        let level = |v: u8| GrayFrame::from_fn(160, 90, move |_, _| v);
        let mut scorer = SceneScorer::new();
        scorer.score(&level(100));

        // 15 of 255 levels, as FFmpeg's select scores it
        let score = scorer.score(&level(115));
        assert!((score - 15.0 / 255.0).abs() < 1e-9, "score {}", score);
        assert!(score < vframe_models::DEFAULT_SCENE_THRESHOLD);

        let mut detector = SceneDetector::new(SceneDetectorConfig::default());
        detector.push(0.0, &level(100));
        assert!(!detector.push(1.0, &level(115)));
    }

    #[test]
    fn test_full_inversion_scores_one() {
        let mut scorer = SceneScorer::new();
        scorer.score(&flat(0));
        assert!((scorer.score(&flat(255)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_static_clip_is_one_segment() {
        let mut detector = SceneDetector::new(SceneDetectorConfig::default());
        for i in 0..40 {
            assert!(!detector.push(i as f64 * 0.25, &stripes(0)));
        }
        let segments = detector.finish(10.0);
        assert_eq!(segments, vec![SceneSegment::new(0.0, 10.0, 0.0)]);
    }

    #[test]
    fn test_cuts_split_duration() {
        let mut detector = SceneDetector::new(SceneDetectorConfig::default());
        for i in 0..40 {
            let t = i as f64 * 0.25;
            let phase = if t < 3.0 { 0 } else if t < 7.0 { 2 } else { 0 };
            detector.push(t, &stripes(phase));
        }
        assert_eq!(detector.cut_count(), 2);
        let segments = detector.finish(10.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start_time, 0.0);
        assert_eq!(segments[1].start_time, 3.0);
        assert_eq!(segments[2].start_time, 7.0);
        assert_eq!(segments[2].end_time, 10.0);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
        assert!(segments[1].score > 0.12);
    }

    #[test]
    fn test_cuts_are_debounced() {
        let config = SceneDetectorConfig {
            min_scene_secs: 2.0,
            ..Default::default()
        };
        let mut detector = SceneDetector::new(config);
        detector.push(0.0, &stripes(0));
        assert!(detector.push(2.5, &stripes(2)));
        // Another change inside the debounce window
        assert!(!detector.push(3.0, &stripes(1)));
        assert_eq!(detector.finish(5.0).len(), 2);
    }

    #[test]
    fn test_no_frames_no_segments() {
        let detector = SceneDetector::new(SceneDetectorConfig::default());
        assert!(detector.finish(10.0).is_empty());
    }

    #[test]
    fn test_analysis_size() {
        let config = SceneDetectorConfig::default();
        assert_eq!(config.analysis_size(1920, 1080), (160, 90));
        assert_eq!(config.analysis_size(600, 320), (160, 84));
        assert_eq!(config.analysis_size(64, 48), (64, 48));
    }
}
