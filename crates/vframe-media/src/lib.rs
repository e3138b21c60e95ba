#![deny(unreachable_patterns)]
//! Video crop and frame extraction core.
//!
//! This crate provides:
//! - Border detection: uniform-line probes with a gradient fallback
//! - Crop transcode: decode, crop and encode through one lifecycle, on the
//!   GPU when a device is available (`transcode`)
//! - Scene-aware frame sampling with a fixed-interval fallback (`scene`)
//! - Perceptual-hash deduplication (`dedup`)
//! - Deterministic simulated backends and synthetic clips (`testing`, behind
//!   the `testing` feature)

pub mod border;
pub mod command;
pub mod dedup;
pub mod error;
pub mod format;
pub mod frame;
pub mod fs_utils;
pub mod hwcontext;
pub mod metrics;
pub mod probe;
pub mod sampler;
pub mod scene;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcode;

pub use border::{detect_crop, CropDetection, CropMethod, CropParams};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use dedup::{dedup, dhash, hamming_distance, DedupOutcome};
pub use error::{MediaError, MediaResult};
pub use format::{PixelFormat, Rational};
pub use frame::{ExtractedFrame, GrayFrame};
pub use hwcontext::{query_free_gpu_memory, DeviceContext, FramePool, GpuBudget, HardwareSession};
pub use probe::{probe_video, VideoInfo};
pub use sampler::{FfmpegSampler, FrameSampler};
pub use scene::{SceneExtraction, SceneExtractor, SceneParams};
pub use transcode::{
    transcode, PipeBackend, TranscodeBackend, TranscodeJob, TranscodeReport, TranscodeRequest,
    TranscodeState,
};
#[cfg(feature = "libav")]
pub use transcode::LibavBackend;
