//! Crop transcode pipeline.
//!
//! `decode -> filter (crop / format) -> encode -> mux`, driven by
//! [`TranscodeJob`] over a [`TranscodeBackend`]:
//! - [`PipeBackend`]: FFmpeg CLI processes with raw frames over pipes
//! - `LibavBackend` (feature `libav`): in-process libav with CUDA frame pools
//! - `testing::SimBackend` (feature `testing`): deterministic in-memory
//!   backend for tests

pub mod backend;
pub mod context;
pub mod filter;
mod job;
#[cfg(feature = "libav")]
pub mod libav;
pub mod negotiate;
pub mod pipe;
pub mod pts;
pub mod state;

pub use backend::{
    FrameDecoder, FrameEncoder, FrameFilterGraph, MediaFrame, MediaPacket, PacketSink,
    PacketSource, Receive, SendStatus, SourceStream, Timestamped, TranscodeBackend,
};
pub use context::{EncoderSettings, StreamContext};
pub use filter::{FilterNode, FilterPlan};
pub use job::{transcode, TranscodeJob, TranscodeReport, TranscodeRequest, TranscodeStats};
#[cfg(feature = "libav")]
pub use libav::LibavBackend;
pub use negotiate::{AccelMode, DecoderChoice, FormatChoice};
pub use pipe::PipeBackend;
pub use pts::PtsGuard;
pub use state::{TranscodeFailure, TranscodeState};
