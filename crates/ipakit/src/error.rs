//! Error types for ipakit operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure the
//! extraction, staging and packaging paths can report to a caller.
//!
//! Cleanup failures (removing an unselected asset, discarding a staging
//! directory, dropping a scratch directory) are never surfaced through this
//! type. They are logged and swallowed where they happen.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for ipakit operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants to handle specific failure cases.
///
/// # Examples
///
/// ```no_run
/// use ipakit::{open_bundle, Error};
///
/// match open_bundle("MyApp.ipa", std::env::temp_dir()) {
///     Ok(bundle) => println!("Bundle at {}", bundle.path().display()),
///     Err(Error::MissingPayload(msg)) => eprintln!("Not an app archive: {msg}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// The archive could not be opened as a zip container.
    ///
    /// Raised before any entry is written: missing `PK` signature, a broken
    /// central directory, or more than one bundle inside `Payload/`.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// The archive has no `Payload/` folder, or `Payload/` holds no `.app`.
    #[error("Missing payload: {0}")]
    MissingPayload(String),

    /// Decompression started but an entry could not be written out.
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// A scan produced nothing worth staging.
    ///
    /// Only reported for icons; an app without dylibs yields an empty session.
    #[error("No assets found: {0}")]
    NoAssetsFound(String),

    /// Reading, copying or creating a file failed.
    #[error("File access error at {}: {source}", path.display())]
    FileAccess {
        /// The path the failing operation touched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Building or placing the output archive failed.
    #[error("Packaging failed: {0}")]
    PackagingFailure(String),

    /// The packaging destination already exists.
    ///
    /// The engine never overwrites; callers confirm and clear the destination
    /// before retrying.
    #[error("Destination already exists: {}", .0.display())]
    DestinationConflict(PathBuf),
}

impl Error {
    /// Wrap an I/O error with the path it occurred on.
    pub(crate) fn file_access(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::FileAccess {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::InvalidArchive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_error_maps_to_invalid_archive() {
        let err: Error = zip::result::ZipError::InvalidArchive("bad".into()).into();
        assert!(matches!(err, Error::InvalidArchive(_)));
    }

    #[test]
    fn test_file_access_display_includes_path() {
        let err = Error::file_access(
            "/tmp/missing.dylib",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing.dylib"));
        assert!(msg.contains("gone"));
    }
}
