//! Input discovery: turn CLI paths into video jobs.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;
use vframe_models::{video_stem, TuningConfig, VideoJob};

use crate::error::{WorkerError, WorkerResult};

/// Extensions picked up when a directory is given.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.iter().any(|v| e.eq_ignore_ascii_case(v)))
        .unwrap_or(false)
}

/// Expand an input path into the videos it names.
///
/// A file is taken as is. A directory expands to its video files (not
/// recursive), sorted by path.
pub fn discover_videos(input: &Path) -> WorkerResult<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(WorkerError::invalid_input(format!("{} does not exist", input.display())));
    }

    let mut videos = Vec::new();
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() && is_video_file(&path) {
            videos.push(path);
        }
    }
    videos.sort();
    debug!(dir = %input.display(), count = videos.len(), "Discovered videos");
    Ok(videos)
}

/// One job per video, each writing frames under `frames_root/<stem>`.
pub fn build_jobs(videos: &[PathBuf], frames_root: &Path, tuning: &TuningConfig) -> Vec<VideoJob> {
    videos
        .iter()
        .map(|video| {
            VideoJob::new(video.clone(), frames_root.join(video_stem(video))).with_tuning(tuning.clone())
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobPayload {
    Many(Vec<VideoJob>),
    One(VideoJob),
}

/// Read job payloads from a JSON file holding one job or a list of jobs.
///
/// Payload tuning overrides the environment defaults entirely; omitted
/// tuning fields take their built-in defaults.
pub fn load_jobs(path: &Path) -> WorkerResult<Vec<VideoJob>> {
    let bytes = std::fs::read(path)?;
    let jobs = match serde_json::from_slice(&bytes)? {
        JobPayload::Many(jobs) => jobs,
        JobPayload::One(job) => vec![job],
    };
    Ok(jobs)
}
