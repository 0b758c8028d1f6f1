//! Application subprocess lifecycle.
//!
//! The app runs in its own process group so the whole tree can be signaled
//! at once. Stop is graceful-then-forceful: SIGTERM to the group, a bounded
//! wait, then SIGKILL. Restart inserts a short settle delay so the new
//! process never races the old one for the port.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

/// How long a stopping app gets to exit on its own.
pub const GRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between stop and start during a restart (port-reuse race).
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Poll interval while waiting for exit.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Handle to the application process.
///
/// Callers share this behind a mutex: the rebuild path, the shutdown path
/// and the exit monitor all touch it concurrently.
pub struct AppProcess {
    command: Vec<String>,
    cwd: PathBuf,
    child: Option<Child>,
}

impl AppProcess {
    pub fn new(command: &[String], cwd: &Path) -> Self {
        Self {
            command: command.to_vec(),
            cwd: cwd.to_path_buf(),
            child: None,
        }
    }

    /// Spawn the app in its own process group. No-op when already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let Some(program) = self.command.first() else {
            anyhow::bail!("run command is empty");
        };

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]).current_dir(&self.cwd);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: signals reach the app and everything it
            // forked, nothing else
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to start app `{program}`"))?;
        crate::log!("serve"; "app started (pid {})", child.id());
        self.child = Some(child);
        Ok(())
    }

    /// True while the child is alive. Reaps a finished child as a side
    /// effect, so the exit monitor can detect crashes.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                crate::debug!("serve"; "app exited with {}", status);
                self.child = None;
                false
            }
            Some(Err(_)) | None => {
                self.child = None;
                false
            }
        }
    }

    /// Graceful stop: termination signal, bounded wait, then force-kill.
    /// No-op when not running.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();

        signal_group_term(&child);

        let deadline = Instant::now() + GRACE_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    crate::debug!("serve"; "app stopped gracefully ({})", status);
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(WAIT_POLL);
                }
                Ok(None) => {
                    crate::log!("serve"; "app did not stop within {:?}, killing pid {}",
                        GRACE_TIMEOUT, pid);
                    signal_group_kill(&child);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(());
                }
                Err(e) => return Err(e).context("failed to wait for app"),
            }
        }
    }

    /// Stop, settle, start.
    pub fn restart(&mut self) -> Result<()> {
        self.stop()?;
        std::thread::sleep(SETTLE_DELAY);
        self.start()
    }

    /// Pid of the running child, if any.
    pub fn pid(&mut self) -> Option<u32> {
        if self.is_running() {
            self.child.as_ref().map(Child::id)
        } else {
            None
        }
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// =============================================================================
// Signaling
// =============================================================================

#[cfg(unix)]
fn signal_group_term(child: &Child) {
    // Negative pid addresses the whole process group
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGTERM);
    }
}

#[cfg(unix)]
fn signal_group_kill(child: &Child) {
    unsafe {
        libc::kill(-(child.id() as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_group_term(_child: &Child) {
    // No portable graceful signal; the bounded wait falls through to kill()
}

#[cfg(not(unix))]
fn signal_group_kill(_child: &Child) {}

// =============================================================================
// Tests
// =============================================================================
