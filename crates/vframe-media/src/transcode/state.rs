//! Transcode job lifecycle states.

use serde::Serialize;
use std::fmt;
use vframe_models::ErrorKind;

/// Why a job ended in [`TranscodeState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodeFailure {
    /// State the job was in when it failed
    pub from: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TranscodeState {
    Init,
    DecoderOpen,
    HwFramesReady,
    FilterGraphBuilt,
    EncoderOpen,
    Streaming,
    Flushing,
    Closed,
    Failed(TranscodeFailure),
}

impl TranscodeState {
    pub fn name(&self) -> &'static str {
        match self {
            TranscodeState::Init => "init",
            TranscodeState::DecoderOpen => "decoder_open",
            TranscodeState::HwFramesReady => "hw_frames_ready",
            TranscodeState::FilterGraphBuilt => "filter_graph_built",
            TranscodeState::EncoderOpen => "encoder_open",
            TranscodeState::Streaming => "streaming",
            TranscodeState::Flushing => "flushing",
            TranscodeState::Closed => "closed",
            TranscodeState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscodeState::Closed | TranscodeState::Failed(_))
    }

    /// Forward edges of the lifecycle; any non-terminal state may fail.
    pub fn can_transition_to(&self, next: &TranscodeState) -> bool {
        use TranscodeState::*;
        match (self, next) {
            (Closed | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Init, DecoderOpen)
            | (DecoderOpen, HwFramesReady)
            | (HwFramesReady, FilterGraphBuilt)
            | (FilterGraphBuilt, EncoderOpen)
            | (EncoderOpen, Streaming)
            | (Streaming, Flushing)
            | (Flushing, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TranscodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeState::Failed(failure) => {
                write!(f, "failed({} in {})", failure.kind, failure.from)
            }
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> TranscodeState {
        TranscodeState::Failed(TranscodeFailure {
            from: "streaming",
            kind: ErrorKind::DecodeFailed,
            message: "bad packet".to_string(),
        })
    }

    #[test]
    fn test_forward_path() {
        let path = [
            TranscodeState::Init,
            TranscodeState::DecoderOpen,
            TranscodeState::HwFramesReady,
            TranscodeState::FilterGraphBuilt,
            TranscodeState::EncoderOpen,
            TranscodeState::Streaming,
            TranscodeState::Flushing,
            TranscodeState::Closed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!TranscodeState::Init.can_transition_to(&TranscodeState::Streaming));
        assert!(!TranscodeState::Flushing.can_transition_to(&TranscodeState::Streaming));
    }

    #[test]
    fn test_terminal_states() {
        assert!(TranscodeState::Streaming.can_transition_to(&failed()));
        assert!(!TranscodeState::Closed.can_transition_to(&failed()));
        assert!(!failed().can_transition_to(&TranscodeState::Closed));
        assert!(failed().is_terminal());
        assert_eq!(failed().to_string(), "failed(decode_failed in streaming)");
    }
}
