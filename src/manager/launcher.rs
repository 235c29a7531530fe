//! Launcher staging.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{Result, UpdateError};

/// Describes the launcher executable and the library files it needs
/// next to it when copied elsewhere.
///
/// The launcher is the small external binary that applies updates while
/// the main binary is not running. Before it is started it is copied
/// into a staging directory, because it may be sitting in a directory
/// that it will later rename or delete. Dependent libraries are copied
/// from the launcher's directory when present and silently skipped when
/// not; they are expected to be available on the system otherwise.
#[derive(Debug)]
pub struct Launcher {
    working_directory: Option<PathBuf>,
    executable: PathBuf,
    dependent_libraries: Vec<PathBuf>,
}

impl Launcher {
    /// Creates a launcher description.
    ///
    /// `executable_path` is either absolute (its parent becomes the
    /// working directory) or a bare filename, in which case the working
    /// directory must be supplied via
    /// [`working_directory`](Self::working_directory) or defaults to the
    /// directory of the current process executable when the launcher is
    /// attached to a manager. Dependent libraries must be bare
    /// filenames.
    pub fn new(
        executable_path: impl Into<PathBuf>,
        dependent_libraries: impl IntoIterator<Item = PathBuf>,
    ) -> Result<Self> {
        let executable_path = executable_path.into();
        let Some(filename) = executable_path.file_name() else {
            return Err(UpdateError::misconfigured(
                "launcher executable does not have a filename",
            ));
        };
        let dependent_libraries: Vec<PathBuf> = dependent_libraries.into_iter().collect();
        for library in &dependent_libraries {
            if library.parent().map(|p| !p.as_os_str().is_empty()).unwrap_or(false) {
                return Err(UpdateError::misconfigured(format!(
                    "dependent library must be a bare filename: {}",
                    library.display()
                )));
            }
        }
        let working_directory = executable_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        Ok(Self {
            working_directory,
            executable: PathBuf::from(filename),
            dependent_libraries,
        })
    }

    /// Sets the directory the launcher executable and its libraries are
    /// copied from.
    pub fn working_directory(&mut self, directory: impl Into<PathBuf>) {
        self.working_directory = Some(directory.into());
    }

    /// The configured working directory, if any.
    pub fn working_directory_path(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Absolute path of the launcher executable, if the working
    /// directory is known.
    pub fn executable(&self) -> PathBuf {
        match &self.working_directory {
            Some(dir) => dir.join(&self.executable),
            None => self.executable.clone(),
        }
    }

    /// Copies the launcher executable and any present dependent
    /// libraries into `directory`, returning the path of the copied
    /// executable.
    pub fn copy_to(&self, directory: &Path) -> Result<PathBuf> {
        let source_dir = self.working_directory.as_deref().ok_or_else(|| {
            UpdateError::misconfigured("the launcher working directory is not known")
        })?;
        fs::create_dir_all(directory)?;

        let source = source_dir.join(&self.executable);
        if !source.exists() {
            return Err(UpdateError::misconfigured(format!(
                "launcher executable does not exist: {}",
                source.display()
            )));
        }
        let target = directory.join(&self.executable);
        fs::copy(&source, &target)?;

        for library in &self.dependent_libraries {
            let library_source = source_dir.join(library);
            if library_source.exists() {
                fs::copy(&library_source, directory.join(library))?;
            }
        }
        Ok(target)
    }
}
