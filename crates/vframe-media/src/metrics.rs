//! Media pipeline metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    // Border detection
    pub const CROP_DETECTIONS_TOTAL: &str = "vframe_crop_detections_total";
    pub const CROP_FALLBACKS_TOTAL: &str = "vframe_crop_fallbacks_total";

    // Transcode
    pub const TRANSCODE_DURATION_SECONDS: &str = "vframe_transcode_duration_seconds";
    pub const TRANSCODE_FRAMES_TOTAL: &str = "vframe_transcode_frames_total";
    pub const TRANSCODES_TOTAL: &str = "vframe_transcodes_total";
    pub const HARDWARE_FALLBACKS_TOTAL: &str = "vframe_hardware_fallbacks_total";
    pub const PTS_ADJUSTMENTS_TOTAL: &str = "vframe_pts_adjustments_total";

    // Scene extraction and dedup
    pub const SCENE_FALLBACKS_TOTAL: &str = "vframe_scene_fallbacks_total";
    pub const FRAMES_EXTRACTED_TOTAL: &str = "vframe_frames_extracted_total";
    pub const DUPLICATES_REMOVED_TOTAL: &str = "vframe_duplicates_removed_total";
}

/// Record a finished crop detection (`uniform`, `gradient`).
pub fn record_crop_detection(method: &str) {
    let labels = [("method", method.to_string())];
    counter!(names::CROP_DETECTIONS_TOTAL, &labels).increment(1);
}

/// Record a fall back to the full-frame crop.
pub fn record_crop_fallback() {
    counter!(names::CROP_FALLBACKS_TOTAL).increment(1);
}

/// Record a transcode that reached a terminal state.
pub fn record_transcode(backend: &str, accel: &str, status: &str, duration_secs: f64, frames: u64) {
    let labels = [
        ("backend", backend.to_string()),
        ("accel", accel.to_string()),
        ("status", status.to_string()),
    ];
    counter!(names::TRANSCODES_TOTAL, &labels).increment(1);
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(duration_secs);
    counter!(names::TRANSCODE_FRAMES_TOTAL, &labels).increment(frames);
}

/// Record a hardware path abandoned for software (`device`, `decoder`).
pub fn record_hardware_fallback(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::HARDWARE_FALLBACKS_TOTAL, &labels).increment(1);
}

pub fn record_pts_adjustments(count: u64) {
    if count > 0 {
        counter!(names::PTS_ADJUSTMENTS_TOTAL).increment(count);
    }
}

pub fn record_scene_fallback() {
    counter!(names::SCENE_FALLBACKS_TOTAL).increment(1);
}

/// Record sampled frames by strategy (`scene_midpoints`, `fixed_interval`).
pub fn record_frames_extracted(strategy: &str, count: usize) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::FRAMES_EXTRACTED_TOTAL, &labels).increment(count as u64);
}

pub fn record_duplicates_removed(count: usize) {
    if count > 0 {
        counter!(names::DUPLICATES_REMOVED_TOTAL).increment(count as u64);
    }
}
