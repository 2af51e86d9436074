use dockhand_core::{Error, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Sends `signal` to a process by PID.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered.
pub fn kill_pid(pid: u32, signal: Signal) -> Result<()> {
    let pid = i32::try_from(pid).map_err(|_| Error::unknown(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| Error::unknown(format!("Failed to signal pid {pid}: {e}")))
}

/// Terminates a child process and reaps it.
///
/// Sends SIGTERM, waits up to `grace`, then kills. A zero grace kills
/// immediately. Returns the exit code if the process reported one.
pub async fn terminate(child: &mut Child, name: &str, grace: Duration) -> Option<i32> {
    if let Ok(Some(status)) = child.try_wait() {
        return status.code();
    }

    if !grace.is_zero() {
        if let Some(pid) = child.id() {
            info!("Sending SIGTERM to {} (pid {})", name, pid);
            if let Err(e) = kill_pid(pid, Signal::SIGTERM) {
                debug!("{}", e);
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                return status.code();
            }
            warn!("{} did not exit within {:?}, killing", name, grace);
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("Failed to kill {}: {}", name, e);
    }
    match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to reap {}: {}", name, e);
            None
        }
    }
}
