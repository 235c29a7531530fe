//! Managing installed versions in the working directory.
//!
//! The [`InstallManager`] owns the on-disk state of the update engine: a
//! working directory holding per-version subdirectories, the
//! distinguished `current` directory with the promoted version, the
//! exclusive `update.lock` file and the transient `.tmp` staging
//! subtree.
//!
//! Two processes cooperate through a manager. The *main* process
//! downloads updates in the background and eventually calls
//! [`launch_latest`](InstallManager::launch_latest), which stages the
//! launcher binary outside the directories about to be replaced,
//! releases the lock and starts the launcher. The *launcher* process
//! calls [`apply_latest`](InstallManager::apply_latest) to promote the
//! staged update into the current directory — the directory rename is
//! the single atomic commit point — and then
//! [`start_latest`](InstallManager::start_latest) to start the main
//! binary again.

pub mod launcher;
pub mod lock;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{
    DEFAULT_CURRENT_DIRECTORY, DEFAULT_EXIT_TIMEOUT, STAGING_DIRECTORY, UPDATE_LOCK_FILENAME,
};
use crate::core::{Result, UpdateError};
use crate::process::{ProcessHost, SystemProcessHost};
use crate::sentinel::{self, VersionDirectory};
use crate::utils::fs::{first_component_under, random_string, remove_dir_all_if_exists};
use crate::version::VersionNumber;

pub use launcher::Launcher;
pub use lock::UpdateLock;

/// Configures and creates an [`InstallManager`].
pub struct InstallManagerBuilder {
    working_directory: PathBuf,
    current_version: VersionNumber,
    current_directory_name: String,
    retain_paths: Vec<PathBuf>,
    launcher: Option<Launcher>,
    process_executable: Option<PathBuf>,
    process_host: Arc<dyn ProcessHost>,
    exit_timeout: Duration,
}

impl InstallManagerBuilder {
    /// Renames the distinguished current directory (default `current`).
    pub fn current_directory_name(mut self, name: impl Into<String>) -> Self {
        self.current_directory_name = name.into();
        self
    }

    /// Declares relative paths that survive updates, e.g. an uninstaller
    /// dropped into the application directory by an installer but absent
    /// from release archives. Absolute paths are rejected at
    /// [`build`](Self::build).
    pub fn retain_installed_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.retain_paths = paths.into_iter().collect();
        self
    }

    /// Attaches the launcher description used by
    /// [`InstallManager::launch_latest`]. A launcher without a working
    /// directory is resolved against the current process executable's
    /// directory.
    pub fn launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Overrides the path of the current process executable, which
    /// otherwise comes from the operating system. The manager uses it to
    /// protect the directory it is running from and to detect whether it
    /// runs inside the current directory.
    pub fn process_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.process_executable = Some(path.into());
        self
    }

    /// Replaces the process collaborator used to start detached
    /// processes and terminate processes under managed directories.
    pub fn process_host(mut self, host: Arc<dyn ProcessHost>) -> Self {
        self.process_host = host;
        self
    }

    /// How long to wait for processes to exit during
    /// [`InstallManager::apply_latest`].
    pub fn exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    /// Acquires the working-directory lock and creates the manager.
    ///
    /// Fails with [`UpdateError::LockContended`] when another manager
    /// holds the lock, and with [`UpdateError::Misconfigured`] when a
    /// retained path is absolute.
    pub fn build(self) -> Result<InstallManager> {
        for path in &self.retain_paths {
            if path.is_absolute() {
                return Err(UpdateError::misconfigured(format!(
                    "retained paths must be relative: {}",
                    path.display()
                )));
            }
        }
        let process_executable = match self.process_executable {
            Some(path) => path,
            None => std::env::current_exe()?,
        };
        let mut launcher = self.launcher;
        if let Some(launcher) = launcher.as_mut() {
            if launcher.working_directory_path().is_none() {
                if let Some(parent) = process_executable.parent() {
                    launcher.working_directory(parent);
                }
            }
        }

        let lock = UpdateLock::acquire(&self.working_directory.join(UPDATE_LOCK_FILENAME))?;
        let manager = InstallManager {
            working_directory: self.working_directory,
            current_version: self.current_version,
            current_directory_name: self.current_directory_name,
            retain_paths: self.retain_paths,
            launcher,
            process_executable,
            process_host: self.process_host,
            exit_timeout: self.exit_timeout,
            lock: Some(lock),
        };
        manager.write_sentinel_for_current_process();
        Ok(manager)
    }
}

/// Owner of the working directory: version directories, the current
/// directory, the update lock and the launch/apply handoff.
pub struct InstallManager {
    working_directory: PathBuf,
    current_version: VersionNumber,
    current_directory_name: String,
    retain_paths: Vec<PathBuf>,
    launcher: Option<Launcher>,
    process_executable: PathBuf,
    process_host: Arc<dyn ProcessHost>,
    exit_timeout: Duration,
    lock: Option<UpdateLock>,
}

impl std::fmt::Debug for InstallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallManager")
            .field("working_directory", &self.working_directory)
            .field("current_version", &self.current_version)
            .field("current_directory_name", &self.current_directory_name)
            .field("retain_paths", &self.retain_paths)
            .field("launcher", &self.launcher)
            .field("process_executable", &self.process_executable)
            .field("exit_timeout", &self.exit_timeout)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl InstallManager {
    /// Starts building a manager for `working_directory`, where
    /// `current_version` is the version of the running application.
    pub fn builder(
        working_directory: impl Into<PathBuf>,
        current_version: VersionNumber,
    ) -> InstallManagerBuilder {
        InstallManagerBuilder {
            working_directory: working_directory.into(),
            current_version,
            current_directory_name: DEFAULT_CURRENT_DIRECTORY.to_string(),
            retain_paths: Vec::new(),
            launcher: None,
            process_executable: None,
            process_host: Arc::new(SystemProcessHost),
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    /// Creates a manager with default configuration; equivalent to
    /// `InstallManager::builder(..).build()`.
    pub fn new(
        working_directory: impl Into<PathBuf>,
        current_version: VersionNumber,
    ) -> Result<Self> {
        Self::builder(working_directory, current_version).build()
    }

    /// The working directory this manager operates in.
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// The version of the running application.
    pub fn current_version(&self) -> &VersionNumber {
        &self.current_version
    }

    /// Name of the distinguished current directory.
    pub fn current_directory_name(&self) -> &str {
        &self.current_directory_name
    }

    /// Path of the current directory inside the working directory.
    pub fn current_path(&self) -> PathBuf {
        self.working_directory.join(&self.current_directory_name)
    }

    /// Acquires the update lock if this manager does not already hold
    /// it.
    pub fn acquire_lock(&mut self) -> Result<()> {
        if self.lock.is_none() {
            self.lock = Some(UpdateLock::acquire(
                &self.working_directory.join(UPDATE_LOCK_FILENAME),
            )?);
        }
        Ok(())
    }

    /// Releases the update lock, deleting the lock file.
    ///
    /// The manager may not be used again until the lock is reacquired
    /// with [`acquire_lock`](Self::acquire_lock); the lock is released
    /// so that a launched child process can take it over.
    pub fn release_lock(&mut self) {
        self.lock = None;
    }

    /// Whether this manager currently holds the update lock.
    pub fn has_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Returns the greatest valid version directory in the working
    /// directory, excluding the current directory, or `None`.
    ///
    /// Returns `None` as well when the layout is inconsistent (two
    /// directories reporting the same version), prompting the caller to
    /// re-download.
    pub fn latest_available_update(&mut self) -> Result<Option<VersionDirectory>> {
        self.acquire_lock()?;
        sentinel::latest_version_directory(
            &self.working_directory,
            &[self.current_directory_name.as_str()],
        )
    }

    /// Removes every child of the working directory except the lock file
    /// and the directory the current process is executing from.
    ///
    /// Useful when automatic updates are turned off and no other version
    /// should ever be launched again. Do not call while an update is in
    /// progress.
    pub fn unlink(&mut self) -> Result<()> {
        self.acquire_lock()?;
        let mut excluded: Vec<OsString> = vec![UPDATE_LOCK_FILENAME.into()];
        self.exclude_process_ancestor(&mut excluded);
        self.remove_children_except(&excluded)
    }

    /// Removes every child of the working directory except the lock
    /// file, the current directory, the directory of the running
    /// version, the directory of the latest available update and the
    /// directory the current process is executing from.
    pub fn prune(&mut self) -> Result<()> {
        self.acquire_lock()?;
        let mut excluded: Vec<OsString> = vec![
            UPDATE_LOCK_FILENAME.into(),
            self.current_directory_name.clone().into(),
            self.current_version.to_string().into(),
        ];
        if let Some(update) = self.latest_available_update()? {
            excluded.push(update.version.to_string().into());
        }
        self.exclude_process_ancestor(&mut excluded);
        self.remove_children_except(&excluded)
    }

    /// Starts the launcher if a newer version is ready, returning
    /// whether it was started. Call this from the main process; when it
    /// returns `true` the caller should exit promptly so the launcher
    /// can replace it.
    ///
    /// A newer version exists when the latest available update is newer
    /// than the running version, or when the current directory holds a
    /// newer version and the running process does not live inside it.
    ///
    /// The launcher executable (and its dependent libraries) is staged
    /// under `.tmp/<random>` inside the working directory first, because
    /// it must not run from a directory it is about to rename. On
    /// success the lock has been released for the launcher to take.
    pub fn launch_latest(&mut self, launcher_arguments: &[OsString]) -> Result<bool> {
        if self.launcher.is_none() {
            return Err(UpdateError::misconfigured(
                "cannot launch latest without a launcher",
            ));
        }
        self.acquire_lock()?;

        let current_path = self.current_path();
        let current_sentinel = sentinel::read(&current_path);
        let update = self.latest_available_update()?;
        let process_is_current = self.process_executable.starts_with(&current_path);

        let update_is_newer = update
            .as_ref()
            .map(|u| u.version > self.current_version)
            .unwrap_or(false);
        let current_is_newer = !process_is_current
            && current_sentinel
                .map(|v| v > self.current_version)
                .unwrap_or(false);
        if !update_is_newer && !current_is_newer {
            return Ok(false);
        }

        let staging = self
            .working_directory
            .join(STAGING_DIRECTORY)
            .join(random_string(8));
        remove_dir_all_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;
        let staged_executable = self
            .launcher
            .as_ref()
            .expect("launcher presence checked above")
            .copy_to(&staging)?;

        info!(
            "starting launcher {} to apply the pending update",
            staged_executable.display()
        );
        self.release_lock();
        self.process_host
            .start_detached(&staged_executable, launcher_arguments)
            .map_err(collaborator_io)?;
        Ok(true)
    }

    /// Promotes the latest available update into the current directory.
    /// Call this from the launcher process.
    ///
    /// Does nothing and returns `None` unless an update newer than the
    /// current directory's version exists. With `kill_processes`,
    /// processes running under the current and update directories are
    /// asked to exit first; any process outliving the timeout fails the
    /// apply with [`UpdateError::ProcessesLingering`]. Retained files
    /// are carried over, the current directory is deleted, and the
    /// update directory is renamed into its place — that rename is the
    /// atomic commit point.
    pub fn apply_latest(&mut self, kill_processes: bool) -> Result<Option<VersionNumber>> {
        self.acquire_lock()?;

        let current_path = self.current_path();
        let update = match self.latest_available_update()? {
            Some(update) => update,
            None => return Ok(None),
        };
        let current_is_older = sentinel::read(&current_path)
            .map(|v| v < update.version)
            .unwrap_or(true);
        if !current_is_older {
            return Ok(None);
        }
        if !update.path.exists() {
            return Err(UpdateError::layout(format!(
                "update directory does not exist: {}",
                update.path.display()
            )));
        }

        if kill_processes {
            for dir in [&current_path, &update.path] {
                self.process_host
                    .terminate_under(dir, self.exit_timeout)
                    .map_err(|_| UpdateError::ProcessesLingering { path: dir.clone() })?;
            }
        }

        if current_path.exists() {
            self.move_retained_files(&current_path, &update.path)?;
            fs::remove_dir_all(&current_path)?;
        }
        // The commit point: after this rename the update is the current
        // version.
        fs::rename(&update.path, &current_path)?;
        info!("applied update {}", update.version);
        Ok(Some(update.version))
    }

    /// Starts the application from the current directory as a detached
    /// process, without applying updates or any other checks. Call this
    /// from the launcher process, after
    /// [`apply_latest`](Self::apply_latest).
    ///
    /// `main_executable` must be relative to the root of the release.
    /// Releases the lock so the started process can acquire it.
    pub fn start_latest(&mut self, main_executable: &Path, args: &[OsString]) -> Result<()> {
        if main_executable.is_absolute() {
            return Err(UpdateError::misconfigured(
                "the main executable path must be relative",
            ));
        }
        self.release_lock();

        let current_path = self.current_path();
        if !current_path.exists() {
            return Err(UpdateError::layout("there is no current version installed"));
        }
        let executable = current_path.join(main_executable);
        if !executable.exists() {
            return Err(UpdateError::misconfigured(format!(
                "the main executable does not exist in the current directory: {}",
                executable.display()
            )));
        }
        self.process_host
            .start_detached(&executable, args)
            .map_err(collaborator_io)
    }

    fn exclude_process_ancestor(&self, excluded: &mut Vec<OsString>) {
        if let Some(first) = first_component_under(&self.process_executable, &self.working_directory)
        {
            excluded.push(first.into_os_string());
        }
    }

    fn remove_children_except(&self, excluded: &[OsString]) -> Result<()> {
        fs::create_dir_all(&self.working_directory)?;
        for entry in fs::read_dir(&self.working_directory)? {
            let entry = entry?;
            if excluded.iter().any(|name| *name == entry.file_name()) {
                continue;
            }
            let path = entry.path();
            debug!("removing {}", path.display());
            if entry.file_type()?.is_dir() {
                // Stop anything still running in there before deletion.
                self.process_host
                    .terminate_under(&path, self.exit_timeout)
                    .map_err(|_| UpdateError::ProcessesLingering { path: path.clone() })?;
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Keeps the current directory's sentinel truthful: when the running
    /// process lives inside the current directory, its sentinel is
    /// rewritten with the running version. Heals sentinels lost to
    /// crashes or manual tampering.
    fn write_sentinel_for_current_process(&self) {
        let current_path = self.current_path();
        if !current_path.exists() || !self.process_executable.starts_with(&current_path) {
            return;
        }
        if let Err(err) = sentinel::write(&current_path, &self.current_version) {
            debug!("failed to heal current sentinel: {err}");
        }
    }

    fn move_retained_files(&self, from: &Path, to: &Path) -> Result<()> {
        for relative in &self.retain_paths {
            let source = from.join(relative);
            if !source.exists() {
                continue;
            }
            let target = to.join(relative);
            if target.exists() {
                // The update ships its own copy; the update wins.
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&source, &target)?;
            debug!("retained {} across the update", relative.display());
        }
        Ok(())
    }
}

fn collaborator_io(err: anyhow::Error) -> UpdateError {
    UpdateError::Io {
        source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    }
}
