//! IPA archive creation.
//!
//! Creates IPA (ZIP) archives from `.app` bundles with the standard `Payload/` structure.
//!
//! For the reverse operation, see the [`extract`](super::extract) module.
//!
//! # Features
//!
//! - Configurable compression via [`CompressionLevel`]
//! - Preserves Unix file permissions and symlinks
//! - Byte-proportional progress reporting while compressing
//!
//! # Examples
//!
//! ```no_run
//! use ipakit::ipa::{create_ipa, CompressionLevel};
//! use std::path::Path;
//!
//! let app_bundle = Path::new("Payload/MyApp.app");
//! create_ipa(app_bundle, "output.ipa", CompressionLevel::DEFAULT)?;
//! # Ok::<(), ipakit::Error>(())
//! ```

use super::extract::PAYLOAD_DIR;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Size of the read buffer; progress is reported once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// ZIP compression level for IPA creation.
///
/// Controls the trade-off between compression speed and output file size.
///
/// # Examples
///
/// ```
/// use ipakit::ipa::CompressionLevel;
///
/// let fast = CompressionLevel::NONE;
/// let balanced = CompressionLevel::DEFAULT;
/// let small = CompressionLevel::MAX;
///
/// // Custom levels are clamped to 0-9
/// let custom = CompressionLevel::new(3);
/// assert_eq!(custom.level(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0). Entries are stored.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Default compression (level 6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum compression (level 9).
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        if self.0 == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0 as i64))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// One filesystem entry scheduled for the archive.
enum PlannedEntry {
    Dir(String),
    Symlink { name: String, target: PathBuf },
    File { name: String, path: PathBuf, size: u64, mode: Option<u32> },
}

/// Creates an IPA file from a `.app` bundle.
///
/// The app bundle is placed inside a `Payload/` directory in the archive,
/// following the standard IPA structure.
///
/// For the reverse operation, see [`extract_ipa`](super::extract_ipa).
///
/// # Errors
///
/// Returns [`Error::FileAccess`] if the app bundle doesn't exist or is not a
/// directory, and [`Error::PackagingFailure`] if any file cannot be read or
/// the archive cannot be written.
pub fn create_ipa(
    app_bundle_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression_level: CompressionLevel,
) -> Result<()> {
    create_ipa_with_progress(
        app_bundle_path,
        output_path,
        compression_level,
        &super::no_progress,
    )
}

/// [`create_ipa`], reporting `bytes compressed / total bytes` after every chunk.
///
/// Reported fractions are non-decreasing and the last one is `1.0`.
pub fn create_ipa_with_progress(
    app_bundle_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression_level: CompressionLevel,
    on_progress: &(dyn Fn(f64) + Sync),
) -> Result<()> {
    let app_bundle_path = app_bundle_path.as_ref();
    let output_path = output_path.as_ref();

    let metadata =
        fs::metadata(app_bundle_path).map_err(|e| Error::file_access(app_bundle_path, e))?;
    if !metadata.is_dir() {
        return Err(Error::file_access(
            app_bundle_path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let app_name = app_bundle_path
        .file_name()
        .ok_or_else(|| Error::PackagingFailure("invalid app bundle path".into()))?
        .to_string_lossy()
        .into_owned();

    let plan = plan_entries(app_bundle_path, &app_name)?;
    let total_bytes: u64 = plan
        .iter()
        .map(|entry| match entry {
            PlannedEntry::File { size, .. } => *size,
            _ => 0,
        })
        .sum();

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::file_access(parent, e))?;
    }

    let file = File::create(output_path).map_err(|e| Error::file_access(output_path, e))?;
    let mut zip = ZipWriter::new(file);
    let options = compression_level.file_options();

    zip.add_directory(format!("{PAYLOAD_DIR}/"), options)
        .map_err(packaging_error)?;

    let mut processed: u64 = 0;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    for entry in plan {
        match entry {
            PlannedEntry::Dir(name) => {
                zip.add_directory(name, options).map_err(packaging_error)?;
            }
            PlannedEntry::Symlink { name, target } => {
                zip.add_symlink(name, target.to_string_lossy(), options)
                    .map_err(packaging_error)?;
            }
            PlannedEntry::File { name, path, mode, .. } => {
                let options = match mode {
                    Some(mode) => options.unix_permissions(mode),
                    None => options,
                };
                zip.start_file(name, options).map_err(packaging_error)?;

                let mut source = File::open(&path).map_err(|e| read_error(&path, e))?;
                loop {
                    let n = source.read(&mut buffer).map_err(|e| read_error(&path, e))?;
                    if n == 0 {
                        break;
                    }
                    zip.write_all(&buffer[..n])
                        .map_err(|e| Error::PackagingFailure(e.to_string()))?;
                    processed += n as u64;
                    if total_bytes > 0 {
                        on_progress((processed as f64 / total_bytes as f64).min(1.0));
                    }
                }
            }
        }
    }

    zip.finish().map_err(packaging_error)?;
    on_progress(1.0);

    Ok(())
}

/// Walk the bundle without following links and map every entry to its archive name.
fn plan_entries(app_bundle_path: &Path, app_name: &str) -> Result<Vec<PlannedEntry>> {
    let mut plan = Vec::new();

    for entry in WalkDir::new(app_bundle_path)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry
            .map_err(|e| Error::PackagingFailure(format!("failed to walk bundle: {e}")))?;
        let path = entry.path();
        let relative_path = path
            .strip_prefix(app_bundle_path)
            .map_err(|_| Error::PackagingFailure("failed to compute relative path".into()))?;

        let archive_path = if relative_path.as_os_str().is_empty() {
            format!("{PAYLOAD_DIR}/{app_name}")
        } else {
            format!("{PAYLOAD_DIR}/{app_name}/{}", archive_name(relative_path))
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            plan.push(PlannedEntry::Dir(format!("{archive_path}/")));
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| read_error(path, e))?;
            plan.push(PlannedEntry::Symlink {
                name: archive_path,
                target,
            });
        } else {
            let metadata = entry.metadata().map_err(|e| {
                Error::PackagingFailure(format!("{}: {}", path.display(), e))
            })?;
            plan.push(PlannedEntry::File {
                name: archive_path,
                path: path.to_path_buf(),
                size: metadata.len(),
                mode: unix_mode(&metadata),
            });
        }
    }

    Ok(plan)
}

/// ZIP entry names always use forward slashes.
fn archive_name(relative_path: &Path) -> String {
    relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn packaging_error(err: zip::result::ZipError) -> Error {
    Error::PackagingFailure(err.to_string())
}

fn read_error(path: &Path, err: io::Error) -> Error {
    Error::PackagingFailure(format!("failed to read {}: {}", path.display(), err))
}
