//! Per-video job input and structured result.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{CropRect, ErrorKind, FrameRecord, SamplingStrategy, TuningConfig};

/// Unique identifier for a video job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One video to process.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    #[serde(default)]
    pub id: JobId,
    /// Source video file
    pub source: PathBuf,
    /// Root directory for this video's frame images
    pub output_dir: PathBuf,
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl VideoJob {
    pub fn new(source: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: JobId::new(),
            source: source.into(),
            output_dir: output_dir.into(),
            tuning: TuningConfig::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    /// File stem used to name derived artifacts.
    pub fn stem(&self) -> String {
        video_stem(&self.source)
    }
}

/// File stem of a video path, or `"video"` when it has none.
pub fn video_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string())
}

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BorderDetection,
    Transcode,
    SceneExtraction,
    Deduplication,
    Output,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BorderDetection => "border_detection",
            Stage::Transcode => "transcode",
            Stage::SceneExtraction => "scene_extraction",
            Stage::Deduplication => "deduplication",
            Stage::Output => "output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// Completed through a fallback path
    Degraded { reason: String },
    Skipped { reason: String },
    Failed { kind: ErrorKind, reason: String },
}

/// Timing and outcome for one stage of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

/// Structured per-video result returned to the job collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingResult {
    pub job_id: JobId,
    pub source: PathBuf,
    pub success: bool,
    /// Frames in the final, deduplicated set
    pub frame_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_rect_used: Option<CropRect>,
    /// Short human-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cropped_video: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingStrategy>,
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
    #[serde(default)]
    pub stages: Vec<StageReport>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Start an empty result for a job; stages fill it in.
    pub fn pending(job: &VideoJob) -> Self {
        Self {
            job_id: job.id.clone(),
            source: job.source.clone(),
            success: false,
            frame_count: 0,
            crop_rect_used: None,
            error: None,
            error_kind: None,
            cropped_video: None,
            sampling: None,
            frames: Vec::new(),
            stages: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    /// Mark the result as failed.
    pub fn fail(mut self, kind: ErrorKind, reason: impl Into<String>) -> Self {
        self.success = false;
        self.error_kind = Some(kind);
        self.error = Some(reason.into());
        self.finished_at = Utc::now();
        self
    }

    /// Mark the result as succeeded with the final frame set.
    pub fn succeed(mut self, frames: Vec<FrameRecord>) -> Self {
        self.success = true;
        self.frame_count = frames.len();
        self.frames = frames;
        self.error = None;
        self.error_kind = None;
        self.finished_at = Utc::now();
        self
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_eq!(JobId::from_string("abc").to_string(), "abc");
    }

    #[test]
    fn test_job_payload_defaults() {
        let job: VideoJob =
            serde_json::from_str(r#"{"source": "/in/clip.mp4", "output_dir": "/out"}"#).unwrap();
        assert_eq!(job.stem(), "clip");
        assert_eq!(job.tuning, TuningConfig::default());
        assert!(!job.id.as_str().is_empty());
    }

    #[test]
    fn test_result_contract_fields() {
        let job = VideoJob::new("/in/a.mp4", "/out");
        let mut result = ProcessingResult::pending(&job);
        result.crop_rect_used = Some(CropRect::new(0, 0, 640, 360));
        let result = result.fail(ErrorKind::EncodeFailed, "encoder rejected frame");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["frame_count"], 0);
        assert_eq!(json["error"], "encoder rejected frame");
        assert_eq!(json["error_kind"], "encode_failed");
        assert_eq!(json["crop_rect_used"]["width"], 640);
    }

    #[test]
    fn test_stage_outcome_tagging() {
        let outcome = StageOutcome::Degraded {
            reason: "full frame".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "degraded");
    }
}
