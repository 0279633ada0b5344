//! Owned scratch directories.
//!
//! A [`ScratchDir`] is removed when the last clone is dropped. Consumers that
//! read from a scratch directory hold a clone, so removal can never happen
//! while one of them is still walking it.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Reference-counted handle to a uniquely named temporary directory.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    inner: Arc<ScratchInner>,
}

#[derive(Debug)]
struct ScratchInner {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Allocate a fresh directory under `root`, creating `root` if needed.
    pub fn new_in(root: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| Error::file_access(root, e))?;

        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|e| Error::file_access(root, e))?;

        debug!("allocated scratch directory {}", dir.path().display());

        Ok(Self {
            inner: Arc::new(ScratchInner {
                path: dir.path().to_path_buf(),
                dir: Some(dir),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of live handles sharing this directory.
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Drop for ScratchInner {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("removed scratch directory {}", self.path.display()),
                Err(e) => warn!(
                    "failed to remove scratch directory {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }
    }
}
