//! IPA handling module.
//!
//! Provides functionality for opening, extracting and repacking IPA files.

pub mod archive;
pub mod extract;

pub use archive::{create_ipa, create_ipa_with_progress, CompressionLevel};
pub use extract::{
    extract_ipa, extract_ipa_with_progress, open_bundle, open_bundle_with_progress, validate_ipa,
};

use crate::scratch::ScratchDir;
use std::path::{Path, PathBuf};

/// Progress sink for callers that don't report.
pub(crate) fn no_progress(_fraction: f64) {}

/// An application bundle ready to be scanned.
///
/// When the bundle was unpacked from an archive, every clone shares ownership
/// of the scratch directory holding it. The directory is removed once the
/// last clone is dropped, so each consumer (dylib scan, icon scan, staging)
/// keeps a clone for as long as it reads from the bundle.
#[derive(Debug, Clone)]
pub struct OpenedBundle {
    path: PathBuf,
    scratch: Option<ScratchDir>,
}

impl OpenedBundle {
    pub(crate) fn unpacked(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            scratch: None,
        }
    }

    pub(crate) fn from_scratch(path: PathBuf, scratch: ScratchDir) -> Self {
        Self {
            path,
            scratch: Some(scratch),
        }
    }

    /// Path to the `.app` directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory the archive was unpacked into, if any.
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    /// Application name used for staging and packaging: the bundle's file
    /// stem (`Demo` for `Demo.app`).
    pub fn app_name(&self) -> String {
        app_name(&self.path)
    }
}

/// File stem of a bundle path, falling back to `"App"`.
pub fn app_name(bundle_path: &Path) -> String {
    bundle_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "App".to_string())
}
