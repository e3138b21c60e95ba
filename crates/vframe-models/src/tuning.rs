//! Tuning parameters for crop detection, scene sampling and dedup.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default number of border-detection probes.
pub const DEFAULT_PROBE_COUNT: usize = 5;
/// Default per-pixel tolerance for uniform border lines.
pub const DEFAULT_TOLERANCE: u8 = 5;
/// Default mean gradient below which a line counts as border.
pub const DEFAULT_EDGE_THRESHOLD: f64 = 10.0;
/// Default minimum crop size as a fraction of the source.
pub const DEFAULT_MIN_CROP_RATIO: f64 = 0.10;
/// Default probe-frame scale factor.
pub const DEFAULT_DOWNSCALE: f64 = 0.5;
/// Default minimum number of extracted frames.
pub const DEFAULT_MIN_FRAMES: usize = 4;
/// Default scene-change sensitivity.
pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.12;
/// Default fixed-interval sampling rate (frames per second).
pub const DEFAULT_SAMPLE_FPS: f64 = 0.1;
/// Default maximum Hamming distance for two frames to be duplicates.
pub const DEFAULT_HASH_DISTANCE: u32 = 5;
/// Default per-channel standard deviation below which a frame is a solid colour.
pub const DEFAULT_SOLID_STD: f64 = 4.0;

/// Per-video tuning parameters.
///
/// Every field has a default, so a job payload only needs to carry the
/// values it wants to override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct TuningConfig {
    /// Number of evenly spaced probe frames for border detection
    #[serde(default = "default_probe_count")]
    #[validate(range(min = 1, max = 64))]
    pub probe_count: usize,

    /// Max deviation from a line's median for it to count as uniform
    #[serde(default = "default_tolerance")]
    pub tolerance: u8,

    /// Mean gradient magnitude below which a line is border (fallback)
    #[serde(default = "default_edge_threshold")]
    #[validate(range(min = 0.0, max = 1020.0))]
    pub edge_threshold: f64,

    /// Smallest accepted crop as a fraction of source width/height
    #[serde(default = "default_min_crop_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_crop_ratio: f64,

    /// Scale factor applied to probe frames
    #[serde(default = "default_downscale")]
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub downscale: f64,

    /// Minimum frames per video; fewer scenes switch to fixed-interval sampling
    #[serde(default = "default_min_frames")]
    #[validate(range(max = 10000))]
    pub min_frames: usize,

    /// Scene-change score above which a cut is placed
    #[serde(default = "default_scene_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub scene_threshold: f64,

    /// Fixed-interval sampling rate in frames per second
    #[serde(default = "default_sample_fps")]
    #[validate(range(exclusive_min = 0.0, max = 120.0))]
    pub sample_fps: f64,

    /// Maximum Hamming distance between duplicate frames
    #[serde(default = "default_hash_distance")]
    #[validate(range(max = 64))]
    pub hash_distance_threshold: u32,

    /// Per-channel standard deviation below which a frame is skipped as blank
    #[serde(default = "default_solid_std")]
    #[validate(range(min = 0.0))]
    pub solid_std_threshold: f64,
}

fn default_probe_count() -> usize {
    DEFAULT_PROBE_COUNT
}
fn default_tolerance() -> u8 {
    DEFAULT_TOLERANCE
}
fn default_edge_threshold() -> f64 {
    DEFAULT_EDGE_THRESHOLD
}
fn default_min_crop_ratio() -> f64 {
    DEFAULT_MIN_CROP_RATIO
}
fn default_downscale() -> f64 {
    DEFAULT_DOWNSCALE
}
fn default_min_frames() -> usize {
    DEFAULT_MIN_FRAMES
}
fn default_scene_threshold() -> f64 {
    DEFAULT_SCENE_THRESHOLD
}
fn default_sample_fps() -> f64 {
    DEFAULT_SAMPLE_FPS
}
fn default_hash_distance() -> u32 {
    DEFAULT_HASH_DISTANCE
}
fn default_solid_std() -> f64 {
    DEFAULT_SOLID_STD
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            probe_count: DEFAULT_PROBE_COUNT,
            tolerance: DEFAULT_TOLERANCE,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            min_crop_ratio: DEFAULT_MIN_CROP_RATIO,
            downscale: DEFAULT_DOWNSCALE,
            min_frames: DEFAULT_MIN_FRAMES,
            scene_threshold: DEFAULT_SCENE_THRESHOLD,
            sample_fps: DEFAULT_SAMPLE_FPS,
            hash_distance_threshold: DEFAULT_HASH_DISTANCE,
            solid_std_threshold: DEFAULT_SOLID_STD,
        }
    }
}
