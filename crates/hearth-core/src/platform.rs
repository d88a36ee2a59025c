//! Platform-specific process management.
//!
//! Liveness checks and termination for processes started by the local
//! backend. All calls here block; async callers go through
//! `tokio::task::spawn_blocking`.

use crate::backend::BackendError;
use tracing::{debug, warn};

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Windows**: looks the PID up with `tasklist`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};

        let Some(nix_pid) = to_nix_pid(pid) else {
            return false;
        };
        match kill(nix_pid, None::<Signal>) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&format!("\"{}\"", pid)))
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        warn!("Process alive check not implemented for this platform");
        true
    }
}

#[cfg(unix)]
fn to_nix_pid(pid: u32) -> Option<nix::unistd::Pid> {
    // 0 and values past i32::MAX would address process groups, not a process.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}

/// Terminate a process gracefully, then forcefully if needed.
///
/// # Platform Behavior
/// - **Linux/macOS**: SIGTERM, wait up to `grace_ms`, then SIGKILL
/// - **Windows**: `taskkill /PID {pid} /F /T`
///
/// A process that is already gone counts as terminated.
pub fn terminate_process(pid: u32, grace_ms: u64) -> Result<(), BackendError> {
    if !is_process_alive(pid) {
        debug!("Process {} is not running", pid);
        reap(pid);
        return Ok(());
    }

    #[cfg(unix)]
    {
        terminate_process_unix(pid, grace_ms)
    }

    #[cfg(windows)]
    {
        let _ = grace_ms;
        terminate_process_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace_ms;
        Err(BackendError::Stop(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

#[cfg(unix)]
fn terminate_process_unix(pid: u32, grace_ms: u64) -> Result<(), BackendError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use std::thread::sleep;
    use std::time::Duration;

    let Some(nix_pid) = to_nix_pid(pid) else {
        return Err(BackendError::Stop(format!("Invalid PID {}", pid)));
    };

    debug!("Sending SIGTERM to process {}", pid);
    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(Errno::EPERM) => {
            return Err(BackendError::Stop(format!(
                "Not permitted to signal process {}",
                pid
            )))
        }
        Err(e) => warn!("Failed to send SIGTERM to {}: {}", pid, e),
    }

    let wait_interval = Duration::from_millis(100);
    for _ in 0..(grace_ms / 100).max(1) {
        sleep(wait_interval);
        reap(pid);
        if !is_process_alive(pid) {
            debug!("Process {} terminated gracefully", pid);
            return Ok(());
        }
    }

    debug!("Process {} still running, sending SIGKILL", pid);
    match kill(nix_pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(BackendError::Stop(format!(
                "Failed to kill process {}: {}",
                pid, e
            )))
        }
    }

    sleep(wait_interval);
    reap(pid);
    if is_process_alive(pid) {
        return Err(BackendError::Stop(format!(
            "Process {} survived SIGKILL",
            pid
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn terminate_process_windows(pid: u32) -> Result<(), BackendError> {
    use std::process::Command;

    debug!("Terminating process {} with taskkill", pid);
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F", "/T"])
        .output()
        .map_err(|e| BackendError::io("Failed to run taskkill", e))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    // "not found" means it already exited
    if stderr.contains("not found") || stderr.contains("not running") {
        Ok(())
    } else {
        Err(BackendError::Stop(format!(
            "taskkill failed for {}: {}",
            pid,
            stderr.trim()
        )))
    }
}

/// Collect the exit status of a child we spawned, so it does not linger as a
/// zombie that still answers `kill(pid, 0)`.
fn reap(pid: u32) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::wait::{waitpid, WaitPidFlag};

        let Some(nix_pid) = to_nix_pid(pid) else {
            return;
        };
        match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => debug!("Reaped process {}: {:?}", pid, status),
            // Not our child; init reaps it.
            Err(Errno::ECHILD) => {}
            Err(e) => debug!("waitpid({}) failed: {}", pid, e),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
