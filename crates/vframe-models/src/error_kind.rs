//! Error taxonomy surfaced to job-status consumers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure categories reported per video.
///
/// Library and hardware error codes are translated into one of these
/// before leaving the media core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Corrupt or too short to probe
    SourceUnreadable,
    /// No usable crop; processing continues with the full frame
    CropDetectionFailed,
    /// Device context or frame pool allocation failed
    HardwareInitFailed,
    FilterGraphInitFailed,
    DecodeFailed,
    EncodeFailed,
    /// Scene analysis failed; fixed-interval sampling is used instead
    SceneDetectionFailed,
    /// Hashing failed; affected frames are kept
    DedupFailed,
    /// Anything not covered above (missing tools, IO outside the core)
    Internal,
}

impl ErrorKind {
    /// Whether this failure aborts the current video.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ErrorKind::CropDetectionFailed | ErrorKind::SceneDetectionFailed | ErrorKind::DedupFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnreadable => "source_unreadable",
            ErrorKind::CropDetectionFailed => "crop_detection_failed",
            ErrorKind::HardwareInitFailed => "hardware_init_failed",
            ErrorKind::FilterGraphInitFailed => "filter_graph_init_failed",
            ErrorKind::DecodeFailed => "decode_failed",
            ErrorKind::EncodeFailed => "encode_failed",
            ErrorKind::SceneDetectionFailed => "scene_detection_failed",
            ErrorKind::DedupFailed => "dedup_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_kinds() {
        assert!(!ErrorKind::CropDetectionFailed.is_fatal());
        assert!(!ErrorKind::SceneDetectionFailed.is_fatal());
        assert!(!ErrorKind::DedupFailed.is_fatal());
        assert!(ErrorKind::HardwareInitFailed.is_fatal());
        assert!(ErrorKind::EncodeFailed.is_fatal());
    }

    #[test]
    fn test_serialized_name_matches_display() {
        let json = serde_json::to_string(&ErrorKind::FilterGraphInitFailed).unwrap();
        assert_eq!(json, format!("\"{}\"", ErrorKind::FilterGraphInitFailed));
    }
}
