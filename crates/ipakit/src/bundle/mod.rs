//! App bundle scanning.
//!
//! This module classifies the contents of an `.app` bundle into assets worth
//! staging for curation:
//!
//! - dynamic libraries (`*.dylib` files and framework principal binaries),
//!   see [`scanner`]
//! - icon images named by `Info.plist`, see [`icons`]
//!
//! Classification never mutates the filesystem. The decisions themselves are
//! pure functions over relative paths ([`is_dylib_path`],
//! [`resolve_icon_candidates`]); [`BundleScanner`] only feeds them a directory
//! walk. Copying happens later, in [`crate::staging`].
//!
//! # Examples
//!
//! ```no_run
//! use ipakit::bundle::BundleScanner;
//!
//! let scanner = BundleScanner::new("/path/to/MyApp.app");
//! for entry in scanner.dylibs() {
//!     println!("{} ({} bytes)", entry.relative_path.display(), entry.size_bytes);
//! }
//! ```

pub mod icons;
pub mod info;
pub mod scanner;

pub use icons::{icon_entries, resolve_icon_candidates};
pub use info::BundleInfo;
pub use scanner::{is_dylib_path, DylibScan};

use std::fmt;
use std::path::{Path, PathBuf};

/// The kinds of asset the scanner extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// A dynamic-library module.
    Dylib,
    /// An icon image.
    Icon,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Dylib => f.write_str("dylib"),
            AssetKind::Icon => f.write_str("icon"),
        }
    }
}

/// One classification decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEntry {
    /// Path relative to the bundle root.
    pub relative_path: PathBuf,
    pub kind: AssetKind,
    /// On-disk size at scan time.
    pub size_bytes: u64,
}

/// Scanner over a single bundle directory.
#[derive(Debug, Clone)]
pub struct BundleScanner {
    root: PathBuf,
}

impl BundleScanner {
    pub fn new(bundle_path: impl AsRef<Path>) -> Self {
        Self {
            root: bundle_path.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the bundle depth-first, yielding dynamic libraries.
    pub fn dylibs(&self) -> DylibScan {
        DylibScan::new(&self.root)
    }

    /// Icon files, largest first.
    pub fn icons(&self) -> Vec<ClassifiedEntry> {
        icon_entries(&self.root)
    }

    /// Every classified entry: dylibs in walk order, then icons.
    pub fn classify(&self) -> impl Iterator<Item = ClassifiedEntry> {
        let icons = self.icons();
        self.dylibs().chain(icons)
    }

    /// Entries of one kind.
    pub fn entries(&self, kind: AssetKind) -> Vec<ClassifiedEntry> {
        match kind {
            AssetKind::Dylib => self.dylibs().collect(),
            AssetKind::Icon => self.icons(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_bundle(dir: &Path) -> PathBuf {
        let app = dir.join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Foo.framework")).unwrap();
        fs::write(app.join("Demo"), b"main").unwrap();
        fs::write(app.join("libtweak.dylib"), b"tweak").unwrap();
        fs::write(app.join("Frameworks/Foo.framework/Foo"), b"foo-binary").unwrap();
        fs::write(app.join("Frameworks/Foo.framework/Info.plist"), b"<plist/>").unwrap();
        fs::write(app.join("Icon.png"), b"png").unwrap();
        app
    }

    #[test]
    fn test_classify_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        let scanner = BundleScanner::new(&app);

        let first: Vec<_> = scanner.classify().collect();
        let second: Vec<_> = scanner.classify().collect();

        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_classify_kinds() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        let entries: Vec<_> = BundleScanner::new(&app).classify().collect();

        let dylibs: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == AssetKind::Dylib)
            .map(|e| e.relative_path.clone())
            .collect();
        assert_eq!(
            dylibs,
            vec![
                PathBuf::from("Frameworks/Foo.framework/Foo"),
                PathBuf::from("libtweak.dylib"),
            ]
        );

        let icons: Vec<_> = entries.iter().filter(|e| e.kind == AssetKind::Icon).collect();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons[0].relative_path, PathBuf::from("Icon.png"));
    }

    #[test]
    fn test_asset_kind_display() {
        assert_eq!(AssetKind::Dylib.to_string(), "dylib");
        assert_eq!(AssetKind::Icon.to_string(), "icon");
    }
}
