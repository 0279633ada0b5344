//! Icon classification.
//!
//! Icons are located from the base names listed in `Info.plist`. Each base
//! name is expanded into the file names the platform would look up
//! (`AppIcon60x60@3x.png`, `AppIcon60x60@2x~ipad.png`, ...) and the ones
//! present at the bundle root are kept. When metadata names nothing that
//! exists, every image at the bundle root is taken instead.
//!
//! Results are ordered by file size, largest first. Size stands in for
//! resolution; image dimensions are never read here.

use super::info::BundleInfo;
use super::{AssetKind, ClassifiedEntry};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Resolution suffixes, highest first.
pub const SCALE_SUFFIXES: [&str; 3] = ["@3x", "@2x", ""];

/// Device suffixes tried for every scale.
const DEVICE_SUFFIXES: [&str; 2] = ["", "~ipad"];

/// Extensions recognised as images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Extension appended to base names that carry none.
const DEFAULT_EXTENSION: &str = "png";

/// Expand icon base names into existing files.
///
/// `lookup` maps a file name at the bundle root to its size, or `None` when
/// no such file exists. Base names that are not a single plain file name
/// (absolute paths, `..`, anything with a separator) are ignored, so the
/// lookup is only ever asked about bundle-root names. Repeated base names
/// are attempted once, and a file
/// reachable from several base names is reported once. The result is sorted
/// by size descending; equal sizes keep discovery order.
///
/// ```
/// use ipakit::bundle::resolve_icon_candidates;
///
/// let sizes = |name: &str| match name {
///     "AppIcon.png" => Some(10),
///     "AppIcon@2x.png" => Some(30),
///     _ => None,
/// };
/// let found = resolve_icon_candidates(&["AppIcon".to_string()], sizes);
/// assert_eq!(found, vec![("AppIcon@2x.png".to_string(), 30), ("AppIcon.png".to_string(), 10)]);
/// ```
pub fn resolve_icon_candidates(
    base_names: &[String],
    lookup: impl Fn(&str) -> Option<u64>,
) -> Vec<(String, u64)> {
    let mut attempted: HashSet<&str> = HashSet::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Vec::new();

    for base in base_names {
        if !attempted.insert(base.as_str()) {
            continue;
        }
        if !is_plain_name(base) {
            warn!("ignoring icon name outside the bundle root: {:?}", base);
            continue;
        }

        let (stem, extension) = split_image_name(base);
        for scale in SCALE_SUFFIXES {
            for device in DEVICE_SUFFIXES {
                let with_extension = format!("{stem}{scale}{device}.{extension}");
                let without_extension = format!("{stem}{scale}{device}");

                for name in [with_extension, without_extension] {
                    if seen.contains(&name) {
                        continue;
                    }
                    if let Some(size) = lookup(&name) {
                        seen.insert(name.clone());
                        found.push((name, size));
                    }
                }
            }
        }
    }

    sort_largest_first(&mut found);
    found
}

/// Whether `name` is exactly one normal path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Split `Icon.png` into `("Icon", "png")`; names without an image
/// extension get the default one.
fn split_image_name(base: &str) -> (&str, &str) {
    if let Some((stem, ext)) = base.rsplit_once('.') {
        if !stem.is_empty() && is_image_extension(ext) {
            return (stem, ext);
        }
    }
    (base, DEFAULT_EXTENSION)
}

fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

fn sort_largest_first(files: &mut [(String, u64)]) {
    // Stable, so ties keep discovery order
    files.sort_by(|a, b| b.1.cmp(&a.1));
}

/// Image files directly at the bundle root, in file-name order.
fn root_images(bundle_path: &Path) -> Vec<(String, u64)> {
    let entries = match fs::read_dir(bundle_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot list {}: {}", bundle_path.display(), e);
            return Vec::new();
        }
    };

    let mut images: Vec<(String, u64)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            let name = entry.file_name().into_string().ok()?;
            let ext = Path::new(&name).extension()?.to_str()?;
            is_image_extension(ext).then_some((name, metadata.len()))
        })
        .collect();

    images.sort_by(|a, b| a.0.cmp(&b.0));
    images
}

fn root_file_size(bundle_path: &Path, name: &str) -> Option<u64> {
    fs::metadata(bundle_path.join(name))
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
}

/// Classify the icons of a bundle, largest first.
pub fn icon_entries(bundle_path: impl AsRef<Path>) -> Vec<ClassifiedEntry> {
    let bundle_path = bundle_path.as_ref();

    let base_names = match BundleInfo::read(bundle_path) {
        Ok(info) => info.icon_base_names(),
        Err(e) => {
            warn!("no icon metadata: {}", e);
            Vec::new()
        }
    };

    let mut files =
        resolve_icon_candidates(&base_names, |name| root_file_size(bundle_path, name));

    if files.is_empty() {
        debug!(
            "no icon named by metadata exists in {}, scanning root images",
            bundle_path.display()
        );
        files = root_images(bundle_path);
        sort_largest_first(&mut files);
    }

    files
        .into_iter()
        .map(|(name, size_bytes)| ClassifiedEntry {
            relative_path: PathBuf::from(name),
            kind: AssetKind::Icon,
            size_bytes,
        })
        .collect()
}
