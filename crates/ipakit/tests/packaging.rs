//! End-to-end packaging tests: bundle in, archive out, archive back in.

use ipakit::{open_bundle, package, CompressionLevel, Config, Error, ProgressState, Workspace};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

fn create_bundle(root: &Path) -> PathBuf {
    let app = root.join("Sample.app");
    fs::create_dir_all(app.join("Frameworks/Kit.framework")).unwrap();
    fs::create_dir_all(app.join("Base.lproj")).unwrap();
    fs::create_dir_all(app.join("Empty")).unwrap();
    fs::write(app.join("Info.plist"), b"<plist version=\"1.0\"><dict/></plist>").unwrap();
    fs::write(app.join("Sample"), (0..=255u8).cycle().take(300 * 1024).collect::<Vec<_>>())
        .unwrap();
    fs::write(app.join("Frameworks/Kit.framework/Kit"), b"kit binary").unwrap();
    fs::write(app.join("Base.lproj/Main.strings"), b"\"a\" = \"b\";").unwrap();
    app
}

/// Relative path of every file and directory under `root`, with file contents.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = entry
                .file_type()
                .is_file()
                .then(|| fs::read(entry.path()).unwrap());
            (relative, contents)
        })
        .collect()
}

#[test]
fn test_round_trip_preserves_contents() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_bundle(temp_dir.path());
    let destination = temp_dir.path().join("out/Sample.ipa");

    package(&app, &destination, CompressionLevel::DEFAULT, &|_: f64| {}).unwrap();
    let reopened = open_bundle(&destination, temp_dir.path().join("scratch")).unwrap();

    assert!(reopened.path().ends_with("Sample.app"));
    assert_eq!(snapshot(reopened.path()), snapshot(&app));
}

#[test]
fn test_round_trip_stored() {
    let temp_dir = TempDir::new().unwrap();
    let app = create_bundle(temp_dir.path());
    let destination = temp_dir.path().join("Sample.ipa");

    package(&app, &destination, CompressionLevel::NONE, &|_: f64| {}).unwrap();
    let reopened = open_bundle(&destination, temp_dir.path().join("scratch")).unwrap();

    assert_eq!(snapshot(reopened.path()), snapshot(&app));
}

#[test]
#[cfg(unix)]
fn test_round_trip_symlinks_and_modes() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let app = create_bundle(temp_dir.path());
    fs::set_permissions(app.join("Sample"), fs::Permissions::from_mode(0o755)).unwrap();
    std::os::unix::fs::symlink("Kit", app.join("Frameworks/Kit.framework/Current")).unwrap();
    let destination = temp_dir.path().join("Sample.ipa");

    package(&app, &destination, CompressionLevel::DEFAULT, &|_: f64| {}).unwrap();
    let reopened = open_bundle(&destination, temp_dir.path().join("scratch")).unwrap();

    let link = reopened.path().join("Frameworks/Kit.framework/Current");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("Kit"));

    let mode = fs::metadata(reopened.path().join("Sample"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn test_workspace_packages_to_default_path() {
    let temp_dir = TempDir::new().unwrap();
    let ws = Workspace::new(
        Config::new(temp_dir.path().join("storage"))
            .compression_level(9)
            .hide_delay(Duration::from_millis(5)),
    );
    let app = create_bundle(temp_dir.path());
    let rx = ws.progress().subscribe();

    let destination = ws.default_archive_path("Sample");
    assert_eq!(destination, temp_dir.path().join("storage/Files/Sample.ipa"));

    let archive = ws.package_as_archive(&app, &destination, |_| false).unwrap();
    assert_eq!(archive, destination);

    let mut fractions = Vec::new();
    loop {
        let snapshot = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match snapshot.state {
            ProgressState::Visible { name, fraction } => {
                assert_eq!(name, "Packaging Sample.app");
                fractions.push(fraction);
            }
            ProgressState::Hidden => break,
        }
    }
    assert_eq!(fractions.first().copied(), Some(0.0));
    assert_eq!(fractions.last().copied(), Some(1.0));
    assert!(fractions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_workspace_conflict_declined_keeps_file() {
    let temp_dir = TempDir::new().unwrap();
    let ws = Workspace::new(Config::new(temp_dir.path().join("storage")));
    let app = create_bundle(temp_dir.path());
    let destination = ws.default_archive_path("Sample");
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, b"previous build").unwrap();

    let result = ws.package_as_archive(&app, &destination, |_| false);

    assert!(matches!(result, Err(Error::DestinationConflict(path)) if path == destination));
    assert_eq!(fs::read(&destination).unwrap(), b"previous build");
}
