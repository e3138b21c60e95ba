//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;
use vframe_models::ErrorKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("Crop detection failed: {0}")]
    CropDetectionFailed(String),

    #[error("Hardware init failed: {0}")]
    HardwareInitFailed(String),

    #[error("Filter graph init failed: {0}")]
    FilterGraphInitFailed(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Scene detection failed: {0}")]
    SceneDetectionFailed(String),

    #[error("Dedup failed: {0}")]
    DedupFailed(String),

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn source_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SourceUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn crop_detection_failed(message: impl Into<String>) -> Self {
        Self::CropDetectionFailed(message.into())
    }

    pub fn hardware_init_failed(message: impl Into<String>) -> Self {
        Self::HardwareInitFailed(message.into())
    }

    pub fn filter_graph_init_failed(message: impl Into<String>) -> Self {
        Self::FilterGraphInitFailed(message.into())
    }

    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::DecodeFailed(message.into())
    }

    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::EncodeFailed(message.into())
    }

    pub fn scene_detection_failed(message: impl Into<String>) -> Self {
        Self::SceneDetectionFailed(message.into())
    }

    pub fn dedup_failed(message: impl Into<String>) -> Self {
        Self::DedupFailed(message.into())
    }

    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Translate into the reported failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::SourceUnreadable { .. }
            | MediaError::FileNotFound(_)
            | MediaError::InvalidVideo(_)
            | MediaError::FfprobeFailed { .. } => ErrorKind::SourceUnreadable,
            MediaError::CropDetectionFailed(_) => ErrorKind::CropDetectionFailed,
            MediaError::HardwareInitFailed(_) => ErrorKind::HardwareInitFailed,
            MediaError::FilterGraphInitFailed(_) => ErrorKind::FilterGraphInitFailed,
            MediaError::DecodeFailed(_) => ErrorKind::DecodeFailed,
            MediaError::EncodeFailed(_) => ErrorKind::EncodeFailed,
            MediaError::SceneDetectionFailed(_) => ErrorKind::SceneDetectionFailed,
            MediaError::DedupFailed(_) => ErrorKind::DedupFailed,
            MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound
            | MediaError::FfmpegFailed { .. }
            | MediaError::InvalidState(_)
            | MediaError::Io(_)
            | MediaError::JsonParse(_)
            | MediaError::Image(_)
            | MediaError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error aborts the current video.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// Short reason string for job-status consumers.
    ///
    /// Drops captured stderr and keeps only the first line of the message.
    pub fn reason(&self) -> String {
        let text = self.to_string();
        let first = text.lines().next().unwrap_or_default();
        let mut reason: String = first.chars().take(MAX_REASON_CHARS).collect();
        if first.chars().count() > MAX_REASON_CHARS {
            reason.push_str("...");
        }
        reason
    }
}

const MAX_REASON_CHARS: usize = 200;

/// Last non-empty line of a captured stderr buffer.
pub(crate) fn last_stderr_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_translation() {
        assert_eq!(
            MediaError::source_unreadable("/x.mp4", "no frames").kind(),
            ErrorKind::SourceUnreadable
        );
        assert_eq!(
            MediaError::FileNotFound(PathBuf::from("/x.mp4")).kind(),
            ErrorKind::SourceUnreadable
        );
        assert_eq!(MediaError::FfmpegNotFound.kind(), ErrorKind::Internal);
        assert!(!MediaError::crop_detection_failed("too small").is_fatal());
        assert!(MediaError::filter_graph_init_failed("bad crop args").is_fatal());
    }

    #[test]
    fn test_reason_is_short() {
        let err = MediaError::encode_failed(format!("{}\nsecond line", "x".repeat(500)));
        let reason = err.reason();
        assert!(reason.len() <= MAX_REASON_CHARS + 3);
        assert!(!reason.contains("second line"));
    }

    #[test]
    fn test_last_stderr_line() {
        let stderr = "frame=1\nError while decoding stream #0:0\n\n";
        assert_eq!(
            last_stderr_line(stderr).as_deref(),
            Some("Error while decoding stream #0:0")
        );
        assert_eq!(last_stderr_line("  \n"), None);
    }
}
