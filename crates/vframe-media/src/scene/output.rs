//! Writing the final frame set and its manifest.

use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vframe_models::FrameRecord;

use crate::error::MediaResult;
use crate::frame::ExtractedFrame;
use crate::fs_utils::{ensure_dir, remove_if_exists, PartialOutput};

/// Manifest handed to the embedding stage.
pub const MANIFEST_FILE: &str = "frames.json";

/// Remove frame images (`{seq}_{ts}.png`) and the manifest left by an
/// earlier run. Other files are untouched. Returns the number removed.
pub fn clear_frames(dir: &Path) -> MediaResult<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| FrameRecord::parse_file_name(n).is_some());
        if is_frame {
            remove_if_exists(&path)?;
            removed += 1;
        }
    }
    remove_if_exists(&dir.join(MANIFEST_FILE))?;
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Removed frames of a previous run");
    }
    Ok(removed)
}

/// Write `frames` as PNG files into `dir`, numbering them 1.. in
/// chronological order. Sets `sequence` and `path` on every frame.
pub fn write_frames(frames: &mut [ExtractedFrame], dir: &Path) -> MediaResult<Vec<FrameRecord>> {
    ensure_dir(dir)?;
    frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut records = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter_mut().enumerate() {
        let sequence = i + 1;
        let target = dir.join(FrameRecord::file_name(sequence, frame.timestamp));
        let partial = PartialOutput::new(&target)?;
        frame.image.save_with_format(partial.path(), ImageFormat::Png)?;
        frame.sequence = sequence;
        frame.path = Some(partial.commit()?);
        if let Some(record) = frame.to_record() {
            records.push(record);
        }
    }
    info!(dir = %dir.display(), frames = records.len(), "Wrote frames");
    Ok(records)
}

/// Write the frame records as `frames.json` in `dir`.
pub fn write_manifest(dir: &Path, records: &[FrameRecord]) -> MediaResult<PathBuf> {
    let target = dir.join(MANIFEST_FILE);
    let partial = PartialOutput::new(&target)?;
    fs::write(partial.path(), serde_json::to_vec_pretty(records)?)?;
    partial.commit()
}
