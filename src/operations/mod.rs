//! Operations applied to extracted release content.
//!
//! A [`ContentOperation`] runs against a directory of extracted release
//! files: before the update is moved into the working directory (content
//! operations, which can abort the update while it is still invisible)
//! or after it has been committed (post-update operations). Closures
//! with the right signature implement the trait directly, so pipelines
//! can be composed from plain functions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::core::Result;
use crate::utils::fs::random_string;

/// An operation over an extracted release directory.
///
/// Returning an error aborts the update; see
/// [`IgnoreFailure`] for demoting an operation's failure to a warning.
pub trait ContentOperation {
    /// Applies the operation to `directory`.
    fn apply(&self, directory: &Path) -> anyhow::Result<()>;
}

impl<F> ContentOperation for F
where
    F: Fn(&Path) -> anyhow::Result<()>,
{
    fn apply(&self, directory: &Path) -> anyhow::Result<()> {
        self(directory)
    }
}

/// Collapses a single-directory archive root.
///
/// Release archives often contain one top-level directory (e.g.
/// `release-1.2.3/`) wrapping the actual content. If `directory`
/// contains exactly one entry and that entry is a directory, its
/// contents are moved up and the now-empty child is removed.
pub struct FlattenRootDirectory {
    required: bool,
}

impl FlattenRootDirectory {
    /// Creates the operation in strict mode: a root that cannot be
    /// flattened (no single-directory child) fails the update.
    pub fn new() -> Self {
        Self { required: true }
    }

    /// Creates the operation in lenient mode: a root that cannot be
    /// flattened is left untouched.
    pub fn optional() -> Self {
        Self { required: false }
    }
}

impl Default for FlattenRootDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentOperation for FlattenRootDirectory {
    fn apply(&self, directory: &Path) -> anyhow::Result<()> {
        let flattened = flatten_root_directory(directory)?;
        if !flattened && self.required {
            anyhow::bail!(
                "cannot flatten {}: it does not contain exactly one directory",
                directory.display()
            );
        }
        Ok(())
    }
}

/// Moves the contents of a single child directory up into `directory`.
///
/// Returns whether flattening happened; a directory that does not
/// consist of exactly one subdirectory is left untouched.
pub fn flatten_root_directory(directory: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(directory)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => return Ok(false),
    };
    if entries.next().is_some() || !first.file_type()?.is_dir() {
        return Ok(false);
    }

    // Rename the child out of the way first, so one of its entries may
    // carry the child's own name.
    let staging = directory.join(format!(".flatten-{}", random_string(8)));
    fs::rename(first.path(), &staging)?;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        fs::rename(entry.path(), directory.join(entry.file_name()))?;
    }
    fs::remove_dir(&staging)?;
    Ok(true)
}

/// Wraps an operation so that its failure is logged and swallowed.
///
/// Useful for best-effort steps such as refreshing a shortcut, where a
/// failure should not abort an otherwise valid update.
pub struct IgnoreFailure<O> {
    operation: O,
}

impl<O: ContentOperation> IgnoreFailure<O> {
    /// Wraps `operation`.
    pub fn new(operation: O) -> Self {
        Self { operation }
    }
}

impl<O: ContentOperation> ContentOperation for IgnoreFailure<O> {
    fn apply(&self, directory: &Path) -> anyhow::Result<()> {
        if let Err(err) = self.operation.apply(directory) {
            warn!("ignoring operation failure: {err:#}");
        }
        Ok(())
    }
}

/// Shell-integration collaborator: creates and queries application
/// shortcuts (start-menu entries, desktop launchers). Implementations
/// are platform glue supplied by the application.
pub trait ShortcutProvider: Send + Sync {
    /// Creates or replaces a shortcut named `link_name` pointing at
    /// `target`, optionally grouped under `category`.
    fn create_shortcut(
        &self,
        target: &Path,
        link_name: &str,
        category: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Whether a shortcut with this name and category already exists.
    fn shortcut_exists(
        &self,
        target: &Path,
        link_name: &str,
        category: Option<&str>,
    ) -> anyhow::Result<bool>;
}

/// Post-update operation that creates or refreshes an application
/// shortcut through a [`ShortcutProvider`].
///
/// A relative target executable is resolved inside the directory the
/// operation runs against, i.e. the freshly installed release.
pub struct CreateShortcut {
    provider: Arc<dyn ShortcutProvider>,
    target_executable: PathBuf,
    link_name: String,
    category: Option<String>,
    only_update: bool,
}

impl CreateShortcut {
    /// Creates a shortcut operation; fails on an empty link or category
    /// name.
    pub fn new(
        provider: Arc<dyn ShortcutProvider>,
        target_executable: impl Into<PathBuf>,
        link_name: impl Into<String>,
        category: Option<String>,
    ) -> Result<Self> {
        let link_name = link_name.into();
        if link_name.is_empty() {
            return Err(crate::core::UpdateError::misconfigured(
                "the shortcut link name cannot be empty",
            ));
        }
        if category.as_deref() == Some("") {
            return Err(crate::core::UpdateError::misconfigured(
                "the shortcut category cannot be empty",
            ));
        }
        Ok(Self {
            provider,
            target_executable: target_executable.into(),
            link_name,
            category,
            only_update: false,
        })
    }

    /// Only refresh the shortcut when it already exists; never create a
    /// new one.
    pub fn only_update(mut self) -> Self {
        self.only_update = true;
        self
    }
}

impl ContentOperation for CreateShortcut {
    fn apply(&self, directory: &Path) -> anyhow::Result<()> {
        let target = if self.target_executable.is_relative() {
            directory.join(&self.target_executable)
        } else {
            self.target_executable.clone()
        };
        if self.only_update
            && !self
                .provider
                .shortcut_exists(&target, &self.link_name, self.category.as_deref())?
        {
            return Ok(());
        }
        if !target.exists() {
            anyhow::bail!("shortcut target does not exist: {}", target.display());
        }
        self.provider
            .create_shortcut(&target, &self.link_name, self.category.as_deref())
    }
}
