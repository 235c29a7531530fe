//! Shared constants for the update engine.

use std::time::Duration;

/// Name of the exclusive lock file in the working directory.
pub const UPDATE_LOCK_FILENAME: &str = "update.lock";

/// Default name of the directory holding the promoted version.
pub const DEFAULT_CURRENT_DIRECTORY: &str = "current";

/// Name of the transient staging subtree used when copying the launcher
/// out of the directories it is about to rename.
pub const STAGING_DIRECTORY: &str = ".tmp";

/// Default time to wait for processes to exit before `apply_latest`
/// gives up with a lingering-processes error.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_millis(2500);

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
