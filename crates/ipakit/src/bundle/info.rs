//! `Info.plist` access.
//!
//! Only the handful of keys the extraction engine consults are exposed.

use crate::{Error, Result};
use plist::{Dictionary, Value};
use std::io;
use std::path::Path;

/// Name of the metadata document at the bundle root.
pub const INFO_PLIST: &str = "Info.plist";

/// Legacy multi-file icon key.
const ICON_FILES_KEY: &str = "CFBundleIconFiles";
/// Modern icon dictionary keys, iPhone first.
const ICONS_KEYS: [&str; 2] = ["CFBundleIcons", "CFBundleIcons~ipad"];
const PRIMARY_ICON_KEY: &str = "CFBundlePrimaryIcon";
/// Single icon name key.
const ICON_FILE_KEY: &str = "CFBundleIconFile";

/// Parsed bundle metadata.
#[derive(Debug, Clone, Default)]
pub struct BundleInfo {
    dict: Dictionary,
}

impl BundleInfo {
    /// Read `Info.plist` from a bundle directory. XML and binary plists are
    /// both accepted.
    pub fn read(bundle_path: impl AsRef<Path>) -> Result<Self> {
        let path = bundle_path.as_ref().join(INFO_PLIST);
        let data = std::fs::read(&path).map_err(|e| Error::file_access(&path, e))?;
        Self::from_bytes(&data)
            .map_err(|e| Error::file_access(&path, io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Parse plist bytes. A document whose root is not a dictionary yields
    /// empty metadata.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, plist::Error> {
        let value: Value = plist::from_bytes(data)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            dict: value.into_dictionary().unwrap_or_default(),
        }
    }

    fn string(&self, key: &str) -> Option<&str> {
        self.dict.get(key).and_then(Value::as_string)
    }

    pub fn executable(&self) -> Option<&str> {
        self.string("CFBundleExecutable")
    }

    pub fn identifier(&self) -> Option<&str> {
        self.string("CFBundleIdentifier")
    }

    /// `CFBundleDisplayName`, falling back to `CFBundleName`.
    pub fn display_name(&self) -> Option<&str> {
        self.string("CFBundleDisplayName")
            .or_else(|| self.string("CFBundleName"))
    }

    /// Icon base names in lookup order: the legacy file list, the modern
    /// primary icon file lists, then the single icon name. Duplicates are
    /// kept; the resolver skips repeated names.
    pub fn icon_base_names(&self) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(files) = self.dict.get(ICON_FILES_KEY) {
            push_strings(&mut names, files);
        }

        for key in ICONS_KEYS {
            let files = self
                .dict
                .get(key)
                .and_then(Value::as_dictionary)
                .and_then(|icons| icons.get(PRIMARY_ICON_KEY))
                .and_then(Value::as_dictionary)
                .and_then(|primary| primary.get(ICON_FILES_KEY));
            if let Some(files) = files {
                push_strings(&mut names, files);
            }
        }

        if let Some(name) = self.string(ICON_FILE_KEY) {
            names.push(name.to_string());
        }

        names
    }
}

fn push_strings(out: &mut Vec<String>, value: &Value) {
    if let Some(items) = value.as_array() {
        out.extend(
            items
                .iter()
                .filter_map(Value::as_string)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }
}
