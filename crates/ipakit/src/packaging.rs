//! Repackaging of application bundles.
//!
//! [`package`] stages a verbatim copy of the bundle under `Payload/` in a
//! scratch directory beside the destination, compresses it, then moves the
//! archive into place with a single rename. The scratch directory is removed
//! on every exit path.

use crate::ipa::{create_ipa_with_progress, CompressionLevel};
use crate::ipa::extract::PAYLOAD_DIR;
use crate::scratch::ScratchDir;
use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SCRATCH_PREFIX: &str = ".ipakit-package-";
const TEMP_ARCHIVE: &str = "archive.tmp";

/// Package `bundle_path` into a new archive at `destination`.
///
/// `on_progress` receives the compressed fraction once per 64 KiB chunk;
/// the last value is `1.0`.
///
/// # Errors
///
/// - [`Error::DestinationConflict`] if `destination` already exists; nothing
///   is written in that case
/// - [`Error::PackagingFailure`] for any copy, compression or rename failure
pub fn package(
    bundle_path: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    compression_level: CompressionLevel,
    on_progress: &(dyn Fn(f64) + Sync),
) -> Result<PathBuf> {
    let bundle_path = bundle_path.as_ref();
    let destination = destination.as_ref();

    if destination.symlink_metadata().is_ok() {
        return Err(Error::DestinationConflict(destination.to_path_buf()));
    }

    package_inner(bundle_path, destination, compression_level, on_progress).map_err(|e| match e {
        Error::DestinationConflict(_) | Error::PackagingFailure(_) => e,
        other => Error::PackagingFailure(other.to_string()),
    })
}

fn package_inner(
    bundle_path: &Path,
    destination: &Path,
    compression_level: CompressionLevel,
    on_progress: &(dyn Fn(f64) + Sync),
) -> Result<PathBuf> {
    let bundle_name = bundle_path
        .file_name()
        .ok_or_else(|| Error::PackagingFailure("invalid app bundle path".into()))?;
    if !bundle_path.is_dir() {
        return Err(Error::PackagingFailure(format!(
            "{} is not a bundle directory",
            bundle_path.display()
        )));
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| Error::file_access(&parent, e))?;

    let scratch = ScratchDir::new_in(&parent, SCRATCH_PREFIX)?;
    let staged_bundle = scratch.path().join(PAYLOAD_DIR).join(bundle_name);

    debug!(
        "copying {} into {}",
        bundle_path.display(),
        staged_bundle.display()
    );
    copy_tree(bundle_path, &staged_bundle)?;

    let temp_archive = scratch.path().join(TEMP_ARCHIVE);
    create_ipa_with_progress(&staged_bundle, &temp_archive, compression_level, on_progress)?;

    move_into_place(&temp_archive, destination)?;

    info!(
        "packaged {} into {}",
        bundle_path.display(),
        destination.display()
    );
    Ok(destination.to_path_buf())
}

/// Rename `from` onto `to`. If something recreated `to` meanwhile, remove it
/// and try once more.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    let first = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if to.symlink_metadata().is_err() {
        return Err(Error::PackagingFailure(format!(
            "failed to move archive to {}: {}",
            to.display(),
            first
        )));
    }

    warn!("{} appeared during packaging, replacing it", to.display());
    remove_path(to).map_err(|e| {
        Error::PackagingFailure(format!("failed to remove {}: {}", to.display(), e))
    })?;
    fs::rename(from, to).map_err(|e| {
        Error::PackagingFailure(format!("failed to move archive to {}: {}", to.display(), e))
    })
}

/// Remove a file, symlink or directory tree.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy a directory tree, recreating symlinks rather than following them and
/// keeping permission bits.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false).sort_by_file_name() {
        let entry =
            entry.map_err(|e| Error::PackagingFailure(format!("failed to walk bundle: {e}")))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| Error::PackagingFailure("failed to compute relative path".into()))?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::file_access(&target, e))?;
            let permissions = entry
                .metadata()
                .map_err(|e| Error::PackagingFailure(format!("{}: {}", entry.path().display(), e)))?
                .permissions();
            fs::set_permissions(&target, permissions)
                .map_err(|e| Error::file_access(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::file_access(entry.path(), e))?;
            copy_symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::file_access(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target).map_err(|e| Error::file_access(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    warn!(
        "symlinks unsupported here, skipping {} -> {}",
        target.display(),
        link.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipa::extract_ipa;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn create_bundle(root: &Path) -> PathBuf {
        let app = root.join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Foo.framework")).unwrap();
        fs::write(app.join("Info.plist"), b"<plist/>").unwrap();
        fs::write(app.join("Demo"), vec![7u8; 200 * 1024]).unwrap();
        fs::write(app.join("Frameworks/Foo.framework/Foo"), b"foo").unwrap();
        app
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(SCRATCH_PREFIX))
            .collect()
    }

    #[test]
    fn test_package_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        let out_dir = temp_dir.path().join("Files");
        let destination = out_dir.join("Demo.ipa");

        let result = package(&app, &destination, CompressionLevel::DEFAULT, &|_: f64| {}).unwrap();
        assert_eq!(result, destination);
        assert!(destination.is_file());
        assert!(leftovers(&out_dir).is_empty());

        let extract_dir = temp_dir.path().join("extracted");
        let extracted = extract_ipa(&destination, &extract_dir).unwrap();
        assert!(extracted.ends_with("Payload/Demo.app"));
        assert_eq!(
            fs::read(extracted.join("Demo")).unwrap(),
            fs::read(app.join("Demo")).unwrap()
        );
        assert_eq!(
            fs::read(extracted.join("Frameworks/Foo.framework/Foo")).unwrap(),
            b"foo"
        );
    }

    #[test]
    fn test_package_reports_progress() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        let destination = temp_dir.path().join("Demo.ipa");

        let seen = Mutex::new(Vec::new());
        package(&app, &destination, CompressionLevel::NONE, &|f: f64| {
            seen.lock().unwrap().push(f)
        })
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert!(seen.len() >= 4);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn test_package_refuses_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        let destination = temp_dir.path().join("Demo.ipa");
        fs::write(&destination, b"keep me").unwrap();

        let result = package(&app, &destination, CompressionLevel::DEFAULT, &|_: f64| {});
        assert!(matches!(result, Err(Error::DestinationConflict(_))));
        assert_eq!(fs::read(&destination).unwrap(), b"keep me");
        assert!(leftovers(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_package_missing_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("Demo.ipa");

        let result = package(
            temp_dir.path().join("Missing.app"),
            &destination,
            CompressionLevel::DEFAULT,
            &|_: f64| {},
        );
        assert!(matches!(result, Err(Error::PackagingFailure(_))));
        assert!(!destination.exists());
        assert!(leftovers(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_move_into_place_replaces_racing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("new.ipa");
        let to = temp_dir.path().join("dest");
        fs::write(&from, b"new").unwrap();
        fs::create_dir_all(to.join("inner")).unwrap();

        move_into_place(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"new");
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_tree_preserves_symlinks_and_modes() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let app = create_bundle(temp_dir.path());
        fs::set_permissions(app.join("Demo"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("Frameworks/Foo.framework/Foo", app.join("Link")).unwrap();

        let copy = temp_dir.path().join("copy/Demo.app");
        copy_tree(&app, &copy).unwrap();

        let mode = fs::metadata(copy.join("Demo")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(fs::symlink_metadata(copy.join("Link")).unwrap().file_type().is_symlink());
        assert_eq!(
            fs::read_link(copy.join("Link")).unwrap(),
            PathBuf::from("Frameworks/Foo.framework/Foo")
        );
    }
}
