//! Main-process / launcher-process handoff scenarios over a real
//! working directory.

mod common;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use regex::Regex;
use tempfile::TempDir;

use common::{
    build_zip, public_key_pem, release_signing_key, MockRelease, RecordingProcessHost, OWNER, REPO,
};
use updraft::extract::ArchiveType;
use updraft::manager::{InstallManager, Launcher};
use updraft::source::ReleaseIndexSource;
use updraft::updater::{UpdateOutcome, UpdatePipeline};
use updraft::verify::{KeyFormat, KeyType, MessageDigestVerifier, Sha256SumsVerifier};
use updraft::{sentinel, VersionNumber};

fn v(s: &str) -> VersionNumber {
    VersionNumber::parse(s).unwrap()
}

fn make_release_dir(wd: &Path, name: &str, version: &str, files: &[(&str, &str)]) {
    let dir = wd.join(name);
    fs::create_dir_all(&dir).unwrap();
    for (file, content) in files {
        fs::write(dir.join(file), content).unwrap();
    }
    sentinel::write(&dir, &v(version)).unwrap();
}

/// The full cycle: the main process downloads and stages an update,
/// hands over to the launcher, and the launcher applies it and starts
/// the new binary.
#[test]
fn full_update_cycle_from_download_to_restart() {
    let archive = build_zip(&[("app.bin", b"binary v1.2.3")]);
    let release = MockRelease::serve("1.2.3", "release-1.2.3.zip", &archive);
    let wd = TempDir::new().unwrap();
    make_release_dir(wd.path(), "current", "1.2.2", &[("app.bin", "binary v1.2.2")]);

    let launcher_files = TempDir::new().unwrap();
    fs::write(launcher_files.path().join("launcher.bin"), "launcher").unwrap();
    let host = Arc::new(RecordingProcessHost::default());

    // Main process: stage the update, then hand over to the launcher.
    {
        let manager = InstallManager::builder(wd.path(), v("1.2.2"))
            .process_executable(wd.path().join("current").join("app.bin"))
            .launcher(Launcher::new(launcher_files.path().join("launcher.bin"), []).unwrap())
            .process_host(host.clone())
            .build()
            .unwrap();
        let manager = Arc::new(Mutex::new(manager));

        let mut pipeline = UpdatePipeline::new(manager.clone());
        pipeline
            .update_source(
                ReleaseIndexSource::new(OWNER, REPO)
                    .unwrap()
                    .allow_insecure_http(true)
                    .index_url(release.index_url()),
            )
            .allow_insecure_http(true)
            .archive_type(ArchiveType::Zip)
            .download_filename_pattern(Regex::new(r"release-.*\.zip").unwrap())
            .filename_contains_version(true)
            .add_update_verification(Sha256SumsVerifier::new("SHA256SUMS"))
            .add_update_verification(MessageDigestVerifier::new(
                "SHA256SUMS",
                "SHA256SUMS.sig",
                KeyFormat::Pem,
                KeyType::Ed25519,
                [public_key_pem(&release_signing_key())],
            ));

        match pipeline.run().unwrap() {
            UpdateOutcome::Updated { version, path } => {
                assert_eq!(version, v("1.2.3"));
                assert!(path.join("app.bin").exists());
            }
            other => panic!("expected an update, got {other:?}"),
        }

        let launched = manager
            .lock()
            .unwrap()
            .launch_latest(&[OsString::from("--apply")])
            .unwrap();
        assert!(launched);
        assert!(!manager.lock().unwrap().has_lock());
    }

    let staged_launcher = {
        let started = host.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        started[0].0.clone()
    };
    assert!(staged_launcher.starts_with(wd.path().join(".tmp")));
    assert!(staged_launcher.exists());

    // Launcher process: apply the update and start the new binary.
    {
        let mut manager = InstallManager::builder(wd.path(), v("1.2.2"))
            .process_executable(&staged_launcher)
            .process_host(host.clone())
            .build()
            .unwrap();

        assert_eq!(manager.apply_latest(true).unwrap(), Some(v("1.2.3")));
        let current = wd.path().join("current");
        assert_eq!(
            fs::read_to_string(current.join("app.bin")).unwrap(),
            "binary v1.2.3"
        );
        assert_eq!(sentinel::read(&current), Some(v("1.2.3")));
        assert!(!wd.path().join("1.2.3").exists());

        manager
            .start_latest(Path::new("app.bin"), &[])
            .unwrap();
    }

    let started = host.started.lock().unwrap();
    assert_eq!(started.len(), 2);
    assert_eq!(started[1].0, wd.path().join("current").join("app.bin"));
}

/// A crash between deleting the current directory and renaming the
/// update leaves the update intact; the next apply completes it.
#[test]
fn apply_latest_recovers_after_a_crash_mid_apply() {
    let wd = TempDir::new().unwrap();
    make_release_dir(wd.path(), "1.2.3", "1.2.3", &[("app.bin", "new")]);
    // The current directory is already gone, as after a crash between
    // the delete and the rename.

    let mut manager = InstallManager::builder(wd.path(), v("1.2.2"))
        .process_executable("/outside/app")
        .build()
        .unwrap();
    assert_eq!(manager.apply_latest(false).unwrap(), Some(v("1.2.3")));
    assert_eq!(
        fs::read_to_string(wd.path().join("current").join("app.bin")).unwrap(),
        "new"
    );
}

/// Retained files moved into the update directory before a crash are
/// picked up by the completed apply.
#[test]
fn retained_files_survive_a_crashed_apply() {
    let wd = TempDir::new().unwrap();
    make_release_dir(
        wd.path(),
        "1.2.3",
        "1.2.3",
        &[("app.bin", "new"), ("uninstall.bin", "keep me")],
    );

    let mut manager = InstallManager::builder(wd.path(), v("1.2.2"))
        .process_executable("/outside/app")
        .retain_installed_files([PathBuf::from("uninstall.bin")])
        .build()
        .unwrap();
    manager.apply_latest(false).unwrap();

    assert_eq!(
        fs::read_to_string(wd.path().join("current").join("uninstall.bin")).unwrap(),
        "keep me"
    );
}

/// Inconsistent layouts (two directories for one version) yield no
/// update, so callers fall back to re-downloading.
#[test]
fn duplicate_version_directories_disable_updates() {
    let wd = TempDir::new().unwrap();
    make_release_dir(wd.path(), "2.1", "2.1", &[]);
    make_release_dir(wd.path(), "2.1.0", "2.1.0", &[]);

    let mut manager = InstallManager::builder(wd.path(), v("1.0"))
        .process_executable("/outside/app")
        .build()
        .unwrap();
    assert!(manager.latest_available_update().unwrap().is_none());
    assert_eq!(manager.apply_latest(false).unwrap(), None);
}

/// The lock file excludes concurrent managers and disappears with its
/// holder.
#[test]
fn lock_lifecycle_across_managers() {
    let wd = TempDir::new().unwrap();

    let first = InstallManager::builder(wd.path(), v("1.0"))
        .process_executable("/outside/app")
        .build()
        .unwrap();
    assert!(wd.path().join("update.lock").exists());

    assert!(InstallManager::builder(wd.path(), v("1.0"))
        .process_executable("/outside/app")
        .build()
        .is_err());

    drop(first);
    assert!(!wd.path().join("update.lock").exists());
    InstallManager::builder(wd.path(), v("1.0"))
        .process_executable("/outside/app")
        .build()
        .unwrap();
}
