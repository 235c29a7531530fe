//! Process collaborators.
//!
//! The engine needs two narrowly-scoped process capabilities: starting a
//! binary detached from the current process, and asking every process
//! executing under a directory to exit before that directory is deleted
//! or renamed. Both are behind the [`ProcessHost`] trait so that
//! applications can plug in their platform's process enumeration; the
//! engine itself ships [`SystemProcessHost`], which can start processes
//! everywhere but does not enumerate them.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::debug;

/// Narrow interface to the host's process facilities.
pub trait ProcessHost: Send + Sync {
    /// Starts `executable` with `args` as a detached process that
    /// outlives the caller. The child's working directory is the
    /// executable's parent directory.
    fn start_detached(&self, executable: &Path, args: &[OsString]) -> anyhow::Result<()>;

    /// Signals every process whose executable lives under `dir` to exit
    /// and waits up to `timeout` for each. Returns an error if any
    /// process is still running afterwards.
    fn terminate_under(&self, dir: &Path, timeout: Duration) -> anyhow::Result<()>;
}

/// Default process host.
///
/// Starts detached processes with the standard library. Process
/// enumeration is platform glue the engine does not ship; this host
/// reports success from [`terminate_under`](ProcessHost::terminate_under)
/// without signalling anyone, which is correct for applications that
/// stop their own processes before applying updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessHost;

impl ProcessHost for SystemProcessHost {
    fn start_detached(&self, executable: &Path, args: &[OsString]) -> anyhow::Result<()> {
        let mut command = Command::new(executable);
        command.args(args);
        if let Some(parent) = executable.parent() {
            command.current_dir(parent);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New session, so the child is not tied to our process group.
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn()?;
        debug!(
            "started {} detached as pid {}",
            executable.display(),
            child.id()
        );
        // Deliberately not waited on; the child outlives us.
        drop(child);
        Ok(())
    }

    fn terminate_under(&self, dir: &Path, _timeout: Duration) -> anyhow::Result<()> {
        debug!(
            "no process enumeration available, assuming nothing runs under {}",
            dir.display()
        );
        Ok(())
    }
}
