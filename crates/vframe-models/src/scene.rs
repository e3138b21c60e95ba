//! Scene segments and extracted-frame records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A contiguous span of the video between two scene cuts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneSegment {
    /// Start time in seconds (inclusive)
    pub start_time: f64,
    /// End time in seconds (exclusive)
    pub end_time: f64,
    /// Score of the cut that opened this segment (0.0 for the first)
    pub score: f64,
}

impl SceneSegment {
    pub fn new(start_time: f64, end_time: f64, score: f64) -> Self {
        Self {
            start_time,
            end_time,
            score,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Representative timestamp used for sampling.
    pub fn midpoint(&self) -> f64 {
        self.start_time + self.duration() / 2.0
    }
}

/// How candidate frames were chosen for a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// One frame at the midpoint of each detected scene
    SceneMidpoints,
    /// Evenly spaced frames at a fixed rate
    FixedInterval,
}

/// A frame written to disk and handed to the embedding stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameRecord {
    /// 1-based position in the final, deduplicated sequence
    pub sequence: usize,
    /// Source frame number at `timestamp`
    pub frame_index: u64,
    /// Presentation time in seconds
    pub timestamp: f64,
    /// Image file path
    pub path: PathBuf,
    /// 64-bit difference hash, when computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<u64>,
}

impl FrameRecord {
    /// File name for a frame: `{sequence}_{timestamp:.2}.png`.
    pub fn file_name(sequence: usize, timestamp: f64) -> String {
        format!("{}_{:.2}.png", sequence, timestamp)
    }

    /// Parse `(sequence, timestamp)` back out of a frame file name.
    pub fn parse_file_name(name: &str) -> Option<(usize, f64)> {
        let stem = name.strip_suffix(".png")?;
        let (seq, ts) = stem.split_once('_')?;
        Some((seq.parse().ok()?, ts.parse().ok()?))
    }
}
