//! Temporary artifact guard.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owns a generated file until the export succeeds. Dropping the guard
/// without calling [`keep`](TempArtifact::keep) deletes the file, so
/// failed, cancelled and timed-out exports leave nothing behind.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// Guard `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    /// Guarded path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the guard at a file that replaced the original (for example
    /// its encrypted form).
    pub fn replace(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Disarm the guard and hand back the path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed temp artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temp artifact {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_guard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"x").unwrap();
        drop(TempArtifact::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_file_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, b"x").unwrap();
        let kept = TempArtifact::new(&path).keep();
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        drop(TempArtifact::new(dir.path().join("never-written.csv")));
    }
}
