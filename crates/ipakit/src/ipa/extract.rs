//! IPA extraction functionality.
//!
//! Opens IPA archives (or unpacked `.app` directories), unpacks archives into
//! a scratch directory and locates the `.app` bundle inside `Payload/`.

use super::OpenedBundle;
use crate::scratch::ScratchDir;
use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use zip::ZipArchive;

/// Name of the folder holding the bundle inside an archive.
pub const PAYLOAD_DIR: &str = "Payload";

/// Extension of application bundles.
pub const BUNDLE_EXTENSION: &str = "app";

/// Prefix for scratch directories allocated by [`open_bundle`].
const SCRATCH_PREFIX: &str = "ipakit-open-";

/// Entry metadata for parallel extraction
struct ExtractEntry {
    index: usize,
    outpath: PathBuf,
    size: u64,
    is_symlink: bool,
    #[cfg(unix)]
    unix_mode: Option<u32>,
}

/// Open an application for scanning.
///
/// `source` is either an IPA archive or an already-unpacked `.app` directory.
/// Archives are unpacked into a fresh scratch directory under `scratch_root`;
/// the returned [`OpenedBundle`] owns that directory and removes it when the
/// last clone is dropped. Directories are returned as-is.
///
/// # Errors
///
/// - [`Error::InvalidArchive`] if the file is not a readable ZIP archive
/// - [`Error::MissingPayload`] if there is no `Payload/*.app` inside it
/// - [`Error::ExtractionFailure`] if an entry cannot be written out
/// - [`Error::FileAccess`] if `source` does not exist
pub fn open_bundle(
    source: impl AsRef<Path>,
    scratch_root: impl AsRef<Path>,
) -> Result<OpenedBundle> {
    open_bundle_with_progress(source, scratch_root, &super::no_progress)
}

/// [`open_bundle`], reporting decompression progress as a fraction in `[0, 1]`.
pub fn open_bundle_with_progress(
    source: impl AsRef<Path>,
    scratch_root: impl AsRef<Path>,
    on_progress: &(dyn Fn(f64) + Sync),
) -> Result<OpenedBundle> {
    let source = source.as_ref();

    let metadata = fs::metadata(source).map_err(|e| Error::file_access(source, e))?;
    if metadata.is_dir() {
        debug!("opening unpacked bundle {}", source.display());
        return Ok(OpenedBundle::unpacked(source));
    }

    validate_ipa(source)?;

    let scratch = ScratchDir::new_in(scratch_root, SCRATCH_PREFIX)?;
    info!(
        "unpacking {} into {}",
        source.display(),
        scratch.path().display()
    );
    let bundle_path = extract_ipa_with_progress(source, scratch.path(), on_progress)?;

    Ok(OpenedBundle::from_scratch(bundle_path, scratch))
}

/// Extract an IPA file to a destination directory.
///
/// IPA files are ZIP archives containing a Payload/ directory with the .app bundle.
/// This function extracts all contents and returns the path to the .app bundle.
///
/// # Arguments
///
/// * `ipa_path` - Path to the IPA file
/// * `dest_dir` - Destination directory for extraction
///
/// # Returns
///
/// Returns the path to the extracted .app bundle inside Payload/.
///
/// # Errors
///
/// Returns an error if:
/// - The IPA file cannot be opened or read
/// - The IPA is not a valid ZIP archive
/// - No .app bundle is found in Payload/
/// - Extraction fails due to I/O errors
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    extract_ipa_with_progress(ipa_path, dest_dir, &super::no_progress)
}

/// [`extract_ipa`], reporting `bytes written / total uncompressed bytes`.
///
/// Files are written in parallel, so calls may arrive out of order; the
/// reported value never exceeds `1.0`.
pub fn extract_ipa_with_progress(
    ipa_path: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
    on_progress: &(dyn Fn(f64) + Sync),
) -> Result<PathBuf> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let file = File::open(ipa_path).map_err(|e| Error::file_access(ipa_path, e))?;
    // SAFETY: the archive is opened read-only and is not modified while mapped.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::file_access(ipa_path, e))?;

    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    fs::create_dir_all(dest_dir).map_err(|e| Error::file_access(dest_dir, e))?;

    // First pass: collect entry metadata and the directories to create
    let mut entries: Vec<ExtractEntry> = Vec::with_capacity(archive.len());
    let mut dirs_to_create: BTreeSet<PathBuf> = BTreeSet::new();

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => {
                debug!("skipping unsafe entry {}", file.name());
                continue;
            }
        };

        if file.is_dir() {
            dirs_to_create.insert(outpath);
            continue;
        }

        #[cfg(unix)]
        let unix_mode = file.unix_mode();

        #[cfg(unix)]
        let is_symlink = unix_mode
            .map(|mode| (mode & 0o170000) == 0o120000)
            .unwrap_or(false);

        #[cfg(not(unix))]
        let is_symlink = false;

        if let Some(parent) = outpath.parent() {
            dirs_to_create.insert(parent.to_path_buf());
        }
        entries.push(ExtractEntry {
            index: i,
            outpath,
            size: file.size(),
            is_symlink,
            #[cfg(unix)]
            unix_mode,
        });
    }

    for dir in &dirs_to_create {
        fs::create_dir_all(dir)
            .map_err(|e| Error::ExtractionFailure(format!("{}: {}", dir.display(), e)))?;
    }

    let total_bytes: u64 = entries.iter().map(|e| e.size).sum();
    let written = AtomicU64::new(0);

    entries.par_iter().try_for_each(|entry| -> Result<()> {
        // Each thread gets its own cursor into the mmap
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
        let mut file = archive
            .by_index(entry.index)
            .map_err(|e| Error::ExtractionFailure(e.to_string()))?;

        write_entry(&mut file, entry)
            .map_err(|e| Error::ExtractionFailure(format!("{}: {}", entry.outpath.display(), e)))?;

        let done = written.fetch_add(entry.size, Ordering::Relaxed) + entry.size;
        if total_bytes > 0 {
            on_progress((done as f64 / total_bytes as f64).min(1.0));
        }
        Ok(())
    })?;

    on_progress(1.0);

    find_app_bundle(dest_dir)
}

fn write_entry(file: &mut impl Read, entry: &ExtractEntry) -> io::Result<()> {
    #[cfg(unix)]
    if entry.is_symlink {
        let mut target = String::new();
        file.read_to_string(&mut target)?;

        if entry.outpath.symlink_metadata().is_ok() {
            let _ = fs::remove_file(&entry.outpath);
        }

        std::os::unix::fs::symlink(&target, &entry.outpath)?;
        return Ok(());
    }

    let mut outfile = File::create(&entry.outpath)?;
    io::copy(file, &mut outfile)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode {
            fs::set_permissions(&entry.outpath, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    Ok(())
}

/// Find the single .app bundle inside a Payload/ directory.
fn find_app_bundle(dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let payload_dir = dest_dir.as_ref().join(PAYLOAD_DIR);

    if !payload_dir.is_dir() {
        return Err(Error::MissingPayload(
            "no Payload directory found in archive".into(),
        ));
    }

    let mut bundles = Vec::new();
    for entry in fs::read_dir(&payload_dir).map_err(|e| Error::file_access(&payload_dir, e))? {
        let path = entry.map_err(|e| Error::file_access(&payload_dir, e))?.path();

        if path.is_dir() && path.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION) {
            bundles.push(path);
        }
    }

    match bundles.len() {
        0 => Err(Error::MissingPayload("no .app bundle found in Payload/".into())),
        1 => Ok(bundles.remove(0)),
        n => Err(Error::InvalidArchive(format!(
            "expected one .app bundle in Payload/, found {n}"
        ))),
    }
}

/// Validate that a path is a valid IPA file.
///
/// Checks that the file exists and has a ZIP signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();

    let mut file = File::open(ipa_path).map_err(|e| Error::file_access(ipa_path, e))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::InvalidArchive(format!(
                "{} is too short to be a ZIP archive",
                ipa_path.display()
            )));
        }
        Err(e) => return Err(Error::file_access(ipa_path, e)),
    }

    // ZIP magic: PK\x03\x04 or PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if &magic[0..2] != b"PK" {
        return Err(Error::InvalidArchive(format!(
            "{} is not a ZIP/IPA file",
            ipa_path.display()
        )));
    }

    Ok(())
}
