//! Run-scoped registry of filesystem paths to remove when a pipeline run ends.
//!
//! The registry is owned by exactly one pipeline run and is injected into
//! every stage that creates removable artifacts (partial downloads, stale
//! cache entries, source archives, extracted tiles). `run_all` executes on
//! every exit path, normal or fatal, and never propagates failures so it
//! cannot mask the original failure reason. Dropping the registry also runs
//! removal, so paths registered before a panic are still removed while the
//! run unwinds.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Paths scheduled for removal at the end of one pipeline run.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a path for removal. Registering the same path twice is
    /// harmless; removal skips paths that no longer exist.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(path = %path.display(), "registered for cleanup");
        self.paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(path);
    }

    /// Removes a path from the registry without deleting it.
    ///
    /// Used when the caller requested source retention after a path was
    /// already scheduled.
    pub fn unregister(&self, path: &Path) {
        self.paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|p| p != path);
    }

    /// Number of currently registered paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every registered path. Missing paths are skipped silently;
    /// removal failures are logged and never returned, so cleanup cannot
    /// shadow the error that aborted the run.
    pub fn run_all(&self) {
        let paths = std::mem::take(
            &mut *self
                .paths
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for path in paths {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "cleanup failed; leaving file in place");
                }
            }
        }
    }
}

/// Last-resort removal for paths still registered when the run unwinds.
/// `run_all` drains the registry, so a normal exit leaves nothing here.
impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        self.run_all();
    }
}
