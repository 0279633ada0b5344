//! Workspace configuration and the on-disk layout under the storage root.
//!
//! ```text
//! <storage root>/
//!   ExtractedDylibs/<AppName>/
//!   ExtractedIcons/<AppName>/
//!   Files/<AppName>.ipa
//! ```

use crate::ipa::CompressionLevel;
use crate::bundle::AssetKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Folder holding staged dynamic libraries, one subfolder per app.
pub const DYLIBS_DIR: &str = "ExtractedDylibs";

/// Folder holding staged icons, one subfolder per app.
pub const ICONS_DIR: &str = "ExtractedIcons";

/// Folder receiving packaged archives.
pub const FILES_DIR: &str = "Files";

/// Extension of packaged archives.
pub const ARCHIVE_EXTENSION: &str = "ipa";

/// How long a completed progress bar stays full before it hides.
pub const DEFAULT_HIDE_DELAY: Duration = Duration::from_millis(300);

/// Configuration for a [`Workspace`](crate::Workspace).
///
/// # Example
///
/// ```
/// use ipakit::Config;
/// use std::time::Duration;
///
/// let config = Config::new("/var/mobile/Documents")
///     .compression_level(9)
///     .hide_delay(Duration::from_millis(100));
/// assert_eq!(config.compression().level(), 9);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    storage_root: PathBuf,
    scratch_root: Option<PathBuf>,
    compression_level: CompressionLevel,
    hide_delay: Duration,
}

impl Config {
    /// Create a configuration rooted at the app's private storage directory.
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            scratch_root: None,
            compression_level: CompressionLevel::DEFAULT,
            hide_delay: DEFAULT_HIDE_DELAY,
        }
    }

    /// Set where archives are unpacked for scanning.
    ///
    /// Defaults to the system temporary directory.
    pub fn scratch_root(mut self, path: impl AsRef<Path>) -> Self {
        self.scratch_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set ZIP compression level for packaged archives (0-9).
    ///
    /// 0 = no compression (fastest), 9 = maximum compression (smallest).
    /// Default is 6.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = CompressionLevel::new(level);
        self
    }

    /// Set the delay between a completed progress bar and its disappearance.
    pub fn hide_delay(mut self, delay: Duration) -> Self {
        self.hide_delay = delay;
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Directory archives are unpacked into.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn compression(&self) -> CompressionLevel {
        self.compression_level
    }

    pub fn delay(&self) -> Duration {
        self.hide_delay
    }

    /// Staging directory for one app and asset kind.
    pub fn staging_dir(&self, app_name: &str, kind: AssetKind) -> PathBuf {
        let folder = match kind {
            AssetKind::Dylib => DYLIBS_DIR,
            AssetKind::Icon => ICONS_DIR,
        };
        self.storage_root.join(folder).join(app_name)
    }

    /// Directory receiving packaged archives.
    pub fn files_dir(&self) -> PathBuf {
        self.storage_root.join(FILES_DIR)
    }

    /// Default output path for an app's archive: `Files/<AppName>.ipa`.
    pub fn archive_path(&self, app_name: &str) -> PathBuf {
        self.files_dir()
            .join(format!("{app_name}.{ARCHIVE_EXTENSION}"))
    }
}
