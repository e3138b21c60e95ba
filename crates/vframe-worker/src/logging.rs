//! Structured per-video logging.
//!
//! Every entry carries the video and operation so a batch's interleaved
//! output can be filtered back to one video.

use tracing::{error, info, warn, Span};
use vframe_models::{JobId, Stage, StageOutcome};

/// Logger bound to one video of a batch.
#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            video_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn from_string(video_id: &str, operation: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video started: {}", message
        );
    }

    /// Log how a stage ended. Failed stages log at error level.
    pub fn log_stage(&self, stage: Stage, outcome: &StageOutcome, elapsed_ms: u64) {
        match outcome {
            StageOutcome::Succeeded => info!(
                video_id = %self.video_id,
                stage = %stage,
                elapsed_ms,
                "Stage succeeded"
            ),
            StageOutcome::Degraded { reason } => warn!(
                video_id = %self.video_id,
                stage = %stage,
                elapsed_ms,
                "Stage degraded: {}", reason
            ),
            StageOutcome::Skipped { reason } => info!(
                video_id = %self.video_id,
                stage = %stage,
                "Stage skipped: {}", reason
            ),
            StageOutcome::Failed { kind, reason } => error!(
                video_id = %self.video_id,
                stage = %stage,
                kind = %kind.as_str(),
                elapsed_ms,
                "Stage failed: {}", reason
            ),
        }
    }

    /// Log a soft failure absorbed by a fallback.
    pub fn log_fallback(&self, stage: Stage, decision: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            stage = %stage,
            "Fallback: {}", decision
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video failed: {}", message
        );
    }

    pub fn log_completion(&self, frames: usize, elapsed_ms: u64) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            frames,
            elapsed_ms,
            "Video completed"
        );
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span that scopes everything logged while the video runs.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "video",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "extract_frames");

        assert_eq!(logger.video_id(), job_id.to_string());
        assert_eq!(logger.operation(), "extract_frames");
    }

    #[test]
    fn test_job_logger_from_string() {
        let logger = JobLogger::from_string("clip-7", "extract_frames");

        assert_eq!(logger.video_id(), "clip-7");
        logger.log_stage(
            Stage::Transcode,
            &StageOutcome::Skipped {
                reason: "reusing cropped clip".into(),
            },
            0,
        );
    }
}
