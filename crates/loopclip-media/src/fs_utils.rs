//! Transient file handling for cached source artifacts.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// A cached file that must be removed once processing concludes.
///
/// Call [`TransientFile::release`] at the end of the job. If the guard is
/// dropped without being released the file is removed synchronously on a
/// best-effort basis.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
    released: bool,
}

impl TransientFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file on disk and disarm the guard.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }

    /// Remove the file. Failures are logged, never returned.
    ///
    /// Returns true if the file is gone afterwards.
    pub async fn release(mut self) -> bool {
        self.released = true;
        remove_quietly(&self.path).await
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed transient file on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove transient file on drop"
            ),
        }
    }
}

/// Remove a file, logging instead of failing. A missing file counts as removed.
pub async fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed transient file");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove transient file"
            );
            false
        }
    }
}
