//! Dynamic-library classification.

use super::{AssetKind, ClassifiedEntry};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// Extension of standalone dynamic libraries.
pub const DYLIB_EXTENSION: &str = "dylib";

/// Suffix of framework folders.
pub const FRAMEWORK_SUFFIX: &str = ".framework";

/// Signature folders never hold loadable code.
const CODE_SIGNATURE_DIR: &str = "_CodeSignature";

/// Decide whether a bundle-relative path names a dynamic-library module.
///
/// A path qualifies if it ends in `.dylib`, or if its file stem equals the
/// name of the nearest enclosing `*.framework` folder (the framework's
/// principal binary, e.g. `Frameworks/Foo.framework/Foo`).
///
/// ```
/// use ipakit::bundle::is_dylib_path;
/// use std::path::Path;
///
/// assert!(is_dylib_path(Path::new("libsubstrate.dylib")));
/// assert!(is_dylib_path(Path::new("Frameworks/Foo.framework/Foo")));
/// assert!(!is_dylib_path(Path::new("Frameworks/Foo.framework/Info.plist")));
/// ```
pub fn is_dylib_path(relative_path: &Path) -> bool {
    if relative_path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DYLIB_EXTENSION))
    {
        return true;
    }

    let Some(stem) = relative_path.file_stem().and_then(OsStr::to_str) else {
        return false;
    };

    relative_path
        .parent()
        .and_then(|parent| {
            parent
                .components()
                .rev()
                .find_map(|c| c.as_os_str().to_str()?.strip_suffix(FRAMEWORK_SUFFIX))
        })
        .is_some_and(|framework| framework == stem)
}

fn is_code_signature(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == CODE_SIGNATURE_DIR
}

fn not_code_signature(entry: &DirEntry) -> bool {
    !is_code_signature(entry)
}

/// Lazy depth-first walk yielding the dynamic libraries of a bundle.
///
/// Directory entries are visited in file-name order so repeated scans of an
/// unchanged bundle yield the same sequence. Symlinks are not followed and
/// never classified. Unreadable entries are skipped.
pub struct DylibScan {
    root: PathBuf,
    walker: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl DylibScan {
    pub(crate) fn new(root: &Path) -> Self {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(not_code_signature as fn(&DirEntry) -> bool);

        Self {
            root: root.to_path_buf(),
            walker,
        }
    }

    fn classify(&self, entry: &DirEntry) -> Option<ClassifiedEntry> {
        if !entry.file_type().is_file() {
            return None;
        }

        let relative_path = entry.path().strip_prefix(&self.root).ok()?;
        if !is_dylib_path(relative_path) {
            return None;
        }

        let size_bytes = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                debug!("skipping {}: {}", entry.path().display(), e);
                return None;
            }
        };

        Some(ClassifiedEntry {
            relative_path: relative_path.to_path_buf(),
            kind: AssetKind::Dylib,
            size_bytes,
        })
    }
}

impl Iterator for DylibScan {
    type Item = ClassifiedEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if let Some(classified) = self.classify(&entry) {
                debug!("classified dylib {}", classified.relative_path.display());
                return Some(classified);
            }
        }
    }
}
