//! Frame-extraction worker.
//!
//! This crate provides:
//! - Per-video orchestration of crop detection, crop transcode, scene
//!   sampling, dedup and frame output (`processor`)
//! - A batch executor bounded by the GPU memory budget (`executor`)
//! - Input discovery and job payload loading (`discovery`)
//! - Environment configuration, structured job logging and metrics

pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use config::WorkerConfig;
pub use discovery::{build_jobs, discover_videos, load_jobs};
pub use error::{WorkerError, WorkerResult};
pub use executor::BatchExecutor;
pub use logging::JobLogger;
pub use processor::{ProcessorOptions, VideoProcessor};
