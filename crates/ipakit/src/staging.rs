//! Staging store.
//!
//! Classified entries are copied out of the bundle into a per-app, per-kind
//! staging directory where the user can review them. Every record points at
//! the copy, never at the bundle.
//!
//! Each staging call stamps its directory with a fresh generation id, kept in
//! a hidden marker file beside the directory (`ExtractedIcons/.Demo.generation`
//! for `ExtractedIcons/Demo/`). A curation session remembers the generation it
//! was created for and leaves the directory alone once a newer call has
//! replaced it.

use crate::bundle::ClassifiedEntry;
use crate::config::Config;
use crate::{Error, Result};
use image::DynamicImage;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use crate::bundle::AssetKind;

/// Suffix of the marker file holding a staging directory's generation id.
const GENERATION_SUFFIX: &str = ".generation";

/// A staged copy of one asset.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub id: Uuid,
    /// File name inside the staging directory.
    pub name: String,
    /// Where the asset lives inside the bundle.
    pub original_relative_path: PathBuf,
    /// Size of the staged copy, measured after copying.
    pub size_bytes: u64,
    pub staged_location: PathBuf,
    pub kind: AssetKind,
    /// Decoded icon, when the asset is an icon the image decoder understands.
    pub image: Option<Arc<DynamicImage>>,
}

/// Copies classified assets into their staging directories.
#[derive(Debug, Clone)]
pub struct StagingStore {
    config: Config,
}

impl StagingStore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Staging directory for an app and kind.
    pub fn dir(&self, app_name: &str, kind: AssetKind) -> PathBuf {
        self.config.staging_dir(app_name, kind)
    }

    /// Copy `entries` from `bundle_root` into a freshly recreated staging
    /// directory.
    ///
    /// Anything previously staged for `(app_name, kind)` is discarded first.
    /// Two entries with the same file name are staged as `name.ext` and
    /// `name (1).ext`.
    ///
    /// # Errors
    ///
    /// - [`Error::NoAssetsFound`] if `kind` is [`AssetKind::Icon`] and
    ///   `entries` is empty
    /// - [`Error::FileAccess`] if the previous content cannot be cleared, the
    ///   directory cannot be created, an entry points outside `bundle_root`,
    ///   or a copy fails; whatever was staged by this call is removed again
    pub fn stage(
        &self,
        bundle_root: &Path,
        entries: &[ClassifiedEntry],
        app_name: &str,
        kind: AssetKind,
    ) -> Result<Vec<AssetRecord>> {
        self.stage_with_progress(bundle_root, entries, app_name, kind, &crate::ipa::no_progress)
    }

    /// [`stage`](Self::stage), reporting `entries copied / total entries`
    /// after every copy.
    pub fn stage_with_progress(
        &self,
        bundle_root: &Path,
        entries: &[ClassifiedEntry],
        app_name: &str,
        kind: AssetKind,
        on_progress: &(dyn Fn(f64) + Sync),
    ) -> Result<Vec<AssetRecord>> {
        let dir = self.dir(app_name, kind);

        // Sessions over the previous content become stale from here on
        clear_generation(&dir);
        recreate_dir(&dir)?;

        if entries.is_empty() && kind == AssetKind::Icon {
            discard_dir(&dir);
            return Err(Error::NoAssetsFound(format!("no icons found for {app_name}")));
        }

        let mut used_names = HashSet::new();
        let mut records = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            match stage_entry(bundle_root, entry, &dir, &mut used_names) {
                Ok(record) => records.push(record),
                Err(e) => {
                    discard_dir(&dir);
                    return Err(e);
                }
            }
            on_progress((i + 1) as f64 / entries.len() as f64);
        }

        if let Err(e) = write_generation(&dir, Uuid::new_v4()) {
            discard_dir(&dir);
            return Err(e);
        }
        on_progress(1.0);

        info!(
            "staged {} {} asset(s) for {} in {}",
            records.len(),
            kind,
            app_name,
            dir.display()
        );
        Ok(records)
    }
}

fn stage_entry(
    bundle_root: &Path,
    entry: &ClassifiedEntry,
    dir: &Path,
    used_names: &mut HashSet<String>,
) -> Result<AssetRecord> {
    if !is_enclosed(&entry.relative_path) {
        return Err(Error::file_access(
            &entry.relative_path,
            io::Error::new(io::ErrorKind::InvalidInput, "path leaves the bundle"),
        ));
    }
    let source = bundle_root.join(&entry.relative_path);
    let file_name = entry
        .relative_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.kind.to_string());

    let name = unique_name(&file_name, used_names);
    used_names.insert(name.clone());

    let staged_location = dir.join(&name);
    if staged_location.symlink_metadata().is_ok() {
        if let Err(e) = fs::remove_file(&staged_location) {
            warn!("failed to remove stale {}: {}", staged_location.display(), e);
        }
    }

    fs::copy(&source, &staged_location).map_err(|e| Error::file_access(&source, e))?;
    let size_bytes = fs::metadata(&staged_location)
        .map_err(|e| Error::file_access(&staged_location, e))?
        .len();

    let image = match entry.kind {
        AssetKind::Icon => decode_image(&staged_location),
        AssetKind::Dylib => None,
    };

    debug!(
        "staged {} -> {}",
        entry.relative_path.display(),
        staged_location.display()
    );

    Ok(AssetRecord {
        id: Uuid::new_v4(),
        name,
        original_relative_path: entry.relative_path.clone(),
        size_bytes,
        staged_location,
        kind: entry.kind,
        image,
    })
}

/// Whether a bundle-relative path stays inside the bundle.
fn is_enclosed(relative_path: &Path) -> bool {
    relative_path.components().next().is_some()
        && relative_path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `name`, or `stem (n).ext` with the smallest free `n`.
fn unique_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(name) {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = format!("{stem} ({counter}){extension}");
        if !used.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn decode_image(path: &Path) -> Option<Arc<DynamicImage>> {
    let decoded = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)
        .and_then(|reader| reader.decode());

    match decoded {
        Ok(image) => Some(Arc::new(image)),
        Err(e) => {
            warn!("cannot decode icon {}: {}", path.display(), e);
            None
        }
    }
}

fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.symlink_metadata().is_ok() {
        discard_dir(dir);
        if dir.symlink_metadata().is_ok() {
            return Err(Error::file_access(
                dir,
                io::Error::other("previously staged assets could not be removed"),
            ));
        }
    }
    fs::create_dir_all(dir).map_err(|e| Error::file_access(dir, e))
}

fn generation_marker(dir: &Path) -> Option<PathBuf> {
    let name = dir.file_name()?.to_string_lossy();
    Some(dir.with_file_name(format!(".{name}{GENERATION_SUFFIX}")))
}

fn write_generation(dir: &Path, generation: Uuid) -> Result<()> {
    let Some(marker) = generation_marker(dir) else {
        return Ok(());
    };
    fs::write(&marker, generation.to_string()).map_err(|e| Error::file_access(&marker, e))
}

/// Generation id of the content currently staged in `dir`, if any.
pub(crate) fn read_generation(dir: &Path) -> Option<Uuid> {
    let marker = generation_marker(dir)?;
    let content = fs::read_to_string(marker).ok()?;
    Uuid::parse_str(content.trim()).ok()
}

/// Forget the generation of `dir`. A missing marker is fine.
pub(crate) fn clear_generation(dir: &Path) {
    let Some(marker) = generation_marker(dir) else {
        return;
    };
    match fs::remove_file(&marker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", marker.display(), e),
    }
}

/// Remove a staging directory, logging instead of failing.
pub(crate) fn discard_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("discarded {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to discard {}: {}", dir.display(), e),
    }
}
