//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must run inside a Tokio runtime; the listener task is spawned on it.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter on {}: {}", addr, e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const VIDEOS_PROCESSED_TOTAL: &str = "vframe_videos_processed_total";
    pub const VIDEO_DURATION_SECONDS: &str = "vframe_video_duration_seconds";
    pub const ACTIVE_JOBS: &str = "vframe_worker_active_jobs";
    pub const FRAMES_WRITTEN_TOTAL: &str = "vframe_frames_written_total";
}

/// Record a finished video (`success`, `failed`).
pub fn record_video(status: &str, duration_secs: f64) {
    let labels = [("status", status.to_string())];
    counter!(names::VIDEOS_PROCESSED_TOTAL, &labels).increment(1);
    histogram!(names::VIDEO_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_frames_written(count: usize) {
    counter!(names::FRAMES_WRITTEN_TOTAL).increment(count as u64);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::ACTIVE_JOBS).set(count as f64);
}
