//! Sampling slots for both strategies.
//!
//! A slot is the time span one output frame is drawn from: a whole scene
//! for midpoint sampling, `duration / count` for fixed-interval sampling.
//! The preferred timestamp is the slot centre; the other candidates are
//! only tried when the centre frame is solid colour or cannot be decoded.

use vframe_models::SceneSegment;

/// Candidate positions within a slot, in the order they are tried.
const SLOT_FRACTIONS: [f64; 5] = [0.5, 0.25, 0.75, 0.125, 0.875];

/// Time span a single output frame is taken from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSlot {
    pub start: f64,
    pub end: f64,
}

impl SampleSlot {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn centre(&self) -> f64 {
        self.at(0.5)
    }

    fn at(&self, fraction: f64) -> f64 {
        self.start + (self.end - self.start).max(0.0) * fraction
    }

    /// Timestamps to try, centre first.
    pub fn candidates(&self) -> impl Iterator<Item = f64> + '_ {
        SLOT_FRACTIONS.iter().map(move |&f| self.at(f))
    }
}

/// One slot per scene.
pub fn scene_slots(segments: &[SceneSegment]) -> Vec<SampleSlot> {
    segments
        .iter()
        .map(|s| SampleSlot::new(s.start_time, s.end_time))
        .collect()
}

/// Number of fixed-interval frames: `max(min_frames, floor(duration * fps))`.
pub fn fixed_interval_count(duration: f64, sample_fps: f64, min_frames: usize) -> usize {
    let by_rate = if duration > 0.0 && sample_fps > 0.0 {
        (duration * sample_fps).floor() as usize
    } else {
        0
    };
    by_rate.max(min_frames)
}

/// Evenly spaced slots covering `[0, duration]`.
pub fn fixed_interval_slots(duration: f64, sample_fps: f64, min_frames: usize) -> Vec<SampleSlot> {
    let count = fixed_interval_count(duration, sample_fps, min_frames);
    (0..count)
        .map(|i| {
            SampleSlot::new(
                duration * i as f64 / count as f64,
                duration * (i + 1) as f64 / count as f64,
            )
        })
        .collect()
}

/// Slot centres, `duration * (i + 0.5) / count`.
pub fn fixed_interval_timestamps(duration: f64, sample_fps: f64, min_frames: usize) -> Vec<f64> {
    fixed_interval_slots(duration, sample_fps, min_frames)
        .iter()
        .map(SampleSlot::centre)
        .collect()
}
