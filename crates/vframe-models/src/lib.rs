//! Shared data models for the vframe pipeline.
//!
//! This crate contains the types exchanged between the media core, the
//! worker and the external job/embedding collaborators:
//! - `CropRect`: crop rectangle in source pixels
//! - `SceneSegment`, `FrameRecord`: scene and frame handoff records
//! - `TuningConfig`: per-video detection and sampling parameters
//! - `EncoderPolicy`, `HardwareMode`, `DeviceKind`: transcode policy
//! - `VideoJob`, `ProcessingResult`: job input and structured result
//! - `ErrorKind`: failure taxonomy

pub mod encoding;
pub mod error_kind;
pub mod job;
pub mod rect;
pub mod scene;
pub mod tuning;

pub use encoding::*;
pub use error_kind::*;
pub use job::*;
pub use rect::*;
pub use scene::*;
pub use tuning::*;
