//! Workspace API
//!
//! [`Workspace`] is the operation surface of the crate: it opens archives and
//! bundles, stages their assets for curation and packages bundles back into
//! archives, reporting every heavy step through its
//! [`ProgressCoordinator`].

use crate::bundle::{AssetKind, BundleScanner};
use crate::config::Config;
use crate::curation::CurationSession;
use crate::ipa::{open_bundle_with_progress, OpenedBundle};
use crate::packaging::{package, remove_path};
use crate::progress::ProgressCoordinator;
use crate::staging::{AssetRecord, StagingStore};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Extraction, curation and packaging over one storage root.
///
/// # Example
///
/// ```no_run
/// use ipakit::{Config, Workspace};
///
/// let workspace = Workspace::new(Config::new("/var/mobile/Documents"));
///
/// let session = workspace.extract_icons("MyApp.ipa")?;
/// let keep: Vec<_> = session.records().iter().take(1).map(|r| r.id).collect();
/// let icons = workspace.finalize_selection(session, keep);
///
/// let bundle = workspace.open("MyApp.ipa")?;
/// let destination = workspace.default_archive_path(&bundle.app_name());
/// workspace.package_as_archive(bundle.path(), &destination, |_existing| true)?;
/// # Ok::<(), ipakit::Error>(())
/// ```
#[derive(Debug)]
pub struct Workspace {
    config: Config,
    staging: StagingStore,
    progress: ProgressCoordinator,
}

impl Workspace {
    /// Create a workspace and start its progress coordinator.
    pub fn new(config: Config) -> Self {
        let progress = ProgressCoordinator::spawn(config.delay());
        Self {
            staging: StagingStore::new(config.clone()),
            config,
            progress,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Progress of every job started through this workspace.
    pub fn progress(&self) -> &ProgressCoordinator {
        &self.progress
    }

    /// Open an archive or an unpacked bundle directory.
    ///
    /// Archives are unpacked under the configured scratch root; the returned
    /// bundle removes that directory once it and all its clones are dropped.
    pub fn open(&self, source: impl AsRef<Path>) -> Result<OpenedBundle> {
        let source = source.as_ref();
        let handle = self.progress.begin(format!("Opening {}", display_name(source)));
        let on_progress = |fraction: f64| handle.update(fraction);

        let bundle = open_bundle_with_progress(source, self.config.scratch_dir(), &on_progress)?;
        handle.complete();
        Ok(bundle)
    }

    /// Open `source` and stage its dynamic libraries.
    pub fn extract_dylibs(&self, source: impl AsRef<Path>) -> Result<CurationSession> {
        let bundle = self.open(source)?;
        self.extract_dylibs_from(&bundle)
    }

    /// Open `source` and stage its icons.
    ///
    /// # Errors
    ///
    /// [`Error::NoAssetsFound`] if the bundle has no icon at all.
    pub fn extract_icons(&self, source: impl AsRef<Path>) -> Result<CurationSession> {
        let bundle = self.open(source)?;
        self.extract_icons_from(&bundle)
    }

    /// Stage the dynamic libraries of an opened bundle. An empty session is
    /// returned when there are none.
    pub fn extract_dylibs_from(&self, bundle: &OpenedBundle) -> Result<CurationSession> {
        self.extract_from(bundle.clone(), AssetKind::Dylib)
    }

    /// Stage the icons of an opened bundle, largest first.
    pub fn extract_icons_from(&self, bundle: &OpenedBundle) -> Result<CurationSession> {
        self.extract_from(bundle.clone(), AssetKind::Icon)
    }

    fn extract_from(&self, bundle: OpenedBundle, kind: AssetKind) -> Result<CurationSession> {
        let app_name = bundle.app_name();
        info!("extracting {} assets from {}", kind, bundle.path().display());

        let entries = BundleScanner::new(bundle.path()).entries(kind);
        let handle = self.progress.begin(format!("Staging {kind}s for {app_name}"));
        let on_progress = |fraction: f64| handle.update(fraction);

        let records =
            self.staging
                .stage_with_progress(bundle.path(), &entries, &app_name, kind, &on_progress)?;
        handle.complete();

        Ok(CurationSession::new(
            &app_name,
            kind,
            self.staging.dir(&app_name, kind),
            records,
        ))
    }

    /// Keep exactly `kept_ids` and delete every other staged copy.
    pub fn finalize_selection(
        &self,
        mut session: CurationSession,
        kept_ids: impl IntoIterator<Item = Uuid>,
    ) -> Vec<AssetRecord> {
        session.set_kept(kept_ids);
        session.finalize()
    }

    /// Discard a session's staging directory.
    pub fn cancel_selection(&self, session: CurationSession) {
        session.cancel();
    }

    /// `Files/<app_name>.ipa` under the storage root.
    pub fn default_archive_path(&self, app_name: &str) -> PathBuf {
        self.config.archive_path(app_name)
    }

    /// Package a bundle directory into an archive at `destination`.
    ///
    /// If `destination` exists, `confirm` is asked before anything else
    /// happens. Declining returns [`Error::DestinationConflict`]; accepting
    /// removes the existing file.
    pub fn package_as_archive(
        &self,
        bundle: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        confirm: impl FnOnce(&Path) -> bool,
    ) -> Result<PathBuf> {
        let bundle = bundle.as_ref();
        let destination = destination.as_ref();

        if destination.symlink_metadata().is_ok() {
            if !confirm(destination) {
                info!("kept existing {}", destination.display());
                return Err(Error::DestinationConflict(destination.to_path_buf()));
            }
            remove_path(destination).map_err(|e| Error::file_access(destination, e))?;
        }

        let handle = self.progress.begin(format!("Packaging {}", display_name(bundle)));
        let on_progress = |fraction: f64| handle.update(fraction);

        let archive = package(bundle, destination, self.config.compression(), &on_progress)?;
        handle.complete();
        Ok(archive)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressState;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn workspace(temp_dir: &TempDir) -> Workspace {
        Workspace::new(
            Config::new(temp_dir.path().join("storage"))
                .scratch_root(temp_dir.path().join("scratch"))
                .hide_delay(Duration::from_millis(5)),
        )
    }

    fn create_bundle(root: &Path) -> PathBuf {
        let app = root.join("Demo.app");
        fs::create_dir_all(app.join("Frameworks/Foo.framework")).unwrap();
        fs::write(app.join("Frameworks/Foo.framework/Foo"), b"foo").unwrap();
        fs::write(app.join("libBar.dylib"), b"bar").unwrap();
        fs::write(app.join("Icon.png"), b"icon").unwrap();
        app
    }

    #[test]
    fn test_extract_from_directory() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());

        let session = workspace.extract_dylibs(&app).unwrap();
        assert_eq!(session.app_name(), "Demo");
        assert_eq!(session.records().len(), 2);
        assert_eq!(
            session.staging_dir(),
            temp_dir.path().join("storage/ExtractedDylibs/Demo")
        );

        let icons = workspace.extract_icons(&app).unwrap();
        assert_eq!(icons.records().len(), 1);
        assert_eq!(icons.records()[0].name, "Icon.png");
    }

    #[test]
    fn test_finalize_and_cancel_selection() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());

        let session = workspace.extract_dylibs(&app).unwrap();
        let dir = session.staging_dir().to_path_buf();
        let first = session.records()[0].id;

        let kept = workspace.finalize_selection(session, [first]);
        assert_eq!(kept.len(), 1);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        let session = workspace.extract_dylibs(&app).unwrap();
        workspace.cancel_selection(session);
        assert!(!dir.exists());
    }

    #[test]
    fn test_package_declined() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());
        let destination = workspace.default_archive_path("Demo");
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, b"old").unwrap();

        let mut asked = None;
        let result = workspace.package_as_archive(&app, &destination, |existing| {
            asked = Some(existing.to_path_buf());
            false
        });

        assert!(matches!(result, Err(Error::DestinationConflict(_))));
        assert_eq!(asked.as_deref(), Some(destination.as_path()));
        assert_eq!(fs::read(&destination).unwrap(), b"old");
    }

    #[test]
    fn test_package_accepted_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());
        let destination = workspace.default_archive_path("Demo");
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, b"old").unwrap();

        let archive = workspace
            .package_as_archive(&app, &destination, |_| true)
            .unwrap();

        assert_eq!(archive, destination);
        assert_ne!(fs::read(&destination).unwrap(), b"old");
    }

    #[test]
    fn test_confirm_not_asked_without_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());
        let destination = workspace.default_archive_path("Demo");

        workspace
            .package_as_archive(&app, &destination, |_| panic!("no conflict expected"))
            .unwrap();
        assert!(destination.is_file());
    }

    #[test]
    fn test_staging_reports_progress() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let app = create_bundle(temp_dir.path());
        let bundle = workspace.open(&app).unwrap();
        let rx = workspace.progress().subscribe();

        workspace.extract_dylibs_from(&bundle).unwrap();

        let mut staging_job = None;
        let mut fractions = Vec::new();
        loop {
            let snapshot = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            match snapshot.state {
                ProgressState::Visible { name, fraction } if name == "Staging dylibs for Demo" => {
                    staging_job = Some(snapshot.job);
                    fractions.push(fraction);
                }
                ProgressState::Hidden if staging_job == Some(snapshot.job) => break,
                _ => {}
            }
        }
        assert_eq!(fractions.last().copied(), Some(1.0));
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_failed_open_leaves_progress_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = workspace(&temp_dir);
        let rx = workspace.progress().subscribe();
        let bogus = temp_dir.path().join("bogus.ipa");
        fs::write(&bogus, b"not a zip").unwrap();

        assert!(workspace.open(&bogus).is_err());

        let last = loop {
            let snapshot = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if snapshot.state == ProgressState::Hidden {
                break snapshot;
            }
        };
        assert_eq!(workspace.progress().state(last.job), ProgressState::Hidden);
    }
}
