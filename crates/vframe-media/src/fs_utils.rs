//! Filesystem helpers for outputs that must never be left half-written.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::MediaResult;

/// Sibling path a writer fills before the final rename.
///
/// `clip.mp4` becomes `clip.partial.mp4`, keeping the extension so muxers
/// still infer the container from it.
pub fn partial_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    path.with_file_name(name)
}

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> MediaResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Remove a file, ignoring "not found".
pub fn remove_if_exists(path: &Path) -> MediaResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Guard for an output file under construction.
///
/// Writers target [`PartialOutput::path`]. `commit` renames it onto the
/// final path; dropping the guard uncommitted deletes the partial file.
#[derive(Debug)]
pub struct PartialOutput {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialOutput {
    /// Prepare a partial path for `target`, removing leftovers of an earlier
    /// crashed run.
    pub fn new(target: impl Into<PathBuf>) -> MediaResult<Self> {
        let target = target.into();
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }
        let partial = partial_path_for(&target);
        remove_if_exists(&partial)?;
        Ok(Self {
            partial,
            target,
            committed: false,
        })
    }

    /// Path writers should write to.
    pub fn path(&self) -> &Path {
        &self.partial
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the finished file into place.
    pub fn commit(mut self) -> MediaResult<PathBuf> {
        fs::rename(&self.partial, &self.target)?;
        self.committed = true;
        debug!(path = %self.target.display(), "Committed output");
        Ok(self.target.clone())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = remove_if_exists(&self.partial) {
            warn!(path = %self.partial.display(), "Failed to discard partial output: {}", e);
        } else {
            debug!(path = %self.partial.display(), "Discarded partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_path_keeps_extension() {
        assert_eq!(
            partial_path_for(Path::new("/tmp/a/clip.mp4")),
            PathBuf::from("/tmp/a/clip.partial.mp4")
        );
        assert_eq!(
            partial_path_for(Path::new("clip")),
            PathBuf::from("clip.partial")
        );
    }

    #[test]
    fn test_commit_renames() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("out.mp4");
        let partial = PartialOutput::new(&target).unwrap();
        fs::write(partial.path(), b"data").unwrap();

        let committed = partial.commit().unwrap();
        assert_eq!(committed, target);
        assert_eq!(fs::read(&target).unwrap(), b"data");
        assert!(!partial_path_for(&target).exists());
    }

    #[test]
    fn test_drop_discards() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.mp4");
        let partial_path = {
            let partial = PartialOutput::new(&target).unwrap();
            fs::write(partial.path(), b"half").unwrap();
            partial.path().to_path_buf()
        };
        assert!(!partial_path.exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_stale_partial_removed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.mp4");
        fs::write(partial_path_for(&target), b"stale").unwrap();
        let partial = PartialOutput::new(&target).unwrap();
        assert!(!partial.path().exists());
    }
}
