//! Extraction, asset staging and repackaging of iOS application archives.
//!
//! `ipakit` opens `.ipa` archives or unpacked `.app` bundles, stages their
//! dynamic libraries and icons for the user to curate, and packages bundles
//! back into archives. Long-running steps report through a progress
//! coordinator.
//!
//! Most callers only need [`Workspace`]:
//!
//! ```no_run
//! use ipakit::{Config, Workspace};
//!
//! let workspace = Workspace::new(Config::new("/path/to/storage").compression_level(9));
//! let session = workspace.extract_dylibs("MyApp.ipa")?;
//! for record in session.records() {
//!     println!("{} ({} bytes)", record.name, record.size_bytes);
//! }
//! let kept = workspace.finalize_selection(session, Vec::new());
//! assert!(kept.is_empty());
//! # Ok::<(), ipakit::Error>(())
//! ```

pub mod bundle;
pub mod config;
pub mod curation;
pub mod error;
pub mod ipa;
pub mod packaging;
pub mod progress;
pub mod scratch;
pub mod staging;
pub mod workspace;

pub use bundle::{AssetKind, BundleScanner, ClassifiedEntry};
pub use config::Config;
pub use curation::CurationSession;
pub use error::Error;
pub use ipa::{create_ipa, extract_ipa, open_bundle, validate_ipa, CompressionLevel, OpenedBundle};
pub use packaging::package;
pub use progress::{JobId, ProgressCoordinator, ProgressHandle, ProgressSnapshot, ProgressState};
pub use scratch::ScratchDir;
pub use staging::{AssetRecord, StagingStore};
pub use workspace::Workspace;

pub type Result<T> = std::result::Result<T, Error>;
