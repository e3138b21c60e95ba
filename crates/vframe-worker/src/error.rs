//! Worker error types.

use thiserror::Error;
use vframe_models::ErrorKind;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] vframe_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Taxonomy entry reported in a `ProcessingResult`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Media(e) => e.kind(),
            WorkerError::InvalidInput(_) => ErrorKind::SourceUnreadable,
            _ => ErrorKind::Internal,
        }
    }

    /// Short reason string for the job collaborator.
    pub fn reason(&self) -> String {
        match self {
            WorkerError::Media(e) => e.reason(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vframe_media::MediaError;

    #[test]
    fn test_media_errors_keep_their_kind() {
        let err: WorkerError = MediaError::encode_failed("nvenc stalled").into();
        assert_eq!(err.kind(), ErrorKind::EncodeFailed);

        let err: WorkerError = MediaError::crop_detection_failed("no agreement").into();
        assert_eq!(err.kind(), ErrorKind::CropDetectionFailed);
    }

    #[test]
    fn test_other_errors_are_internal() {
        let err: WorkerError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.reason().contains("disk full"));

        assert_eq!(WorkerError::invalid_input("no videos").kind(), ErrorKind::SourceUnreadable);
    }
}
