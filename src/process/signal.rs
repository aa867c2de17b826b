//! Signal delivery for dev-server groups and stray processes.
//!
//! Dev servers are spawned as process-group leaders, so terminating the
//! group reaches the login shell and everything it started.

use std::time::Duration;

use tracing::{info, warn};

use crate::{AppError, Result};

/// Interval between liveness checks while waiting for a process to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(unix)]
fn to_nix_pid(pid: u32) -> Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .map(nix::unistd::Pid::from_raw)
        .map_err(|_| AppError::Process(format!("pid {pid} out of range")))
}

/// Ask a process group to terminate (SIGTERM).
///
/// Falls back to signalling the single PID when it does not lead a group.
/// A group that is already gone is not an error.
///
/// # Errors
///
/// Returns `AppError::Process` if the signal cannot be delivered for a
/// reason other than the target having exited.
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Force-kill a process group (SIGKILL).
///
/// # Errors
///
/// Returns `AppError::Process` if the signal cannot be delivered for a
/// reason other than the target having exited.
#[cfg(unix)]
pub fn kill_group(pid: u32) -> Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};

    let target = to_nix_pid(pid)?;
    match killpg(target, signal) {
        Ok(()) => Ok(()),
        // No such group: the PID is not a group leader (or already gone).
        Err(Errno::ESRCH) => match kill(target, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::Process(format!("{signal} to {pid}: {err}"))),
        },
        Err(err) => Err(AppError::Process(format!("{signal} to group {pid}: {err}"))),
    }
}

/// Whether a PID currently exists.
#[cfg(unix)]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;

    let Ok(target) = to_nix_pid(pid) else {
        return false;
    };
    matches!(
        nix::sys::signal::kill(target, None),
        Ok(()) | Err(Errno::EPERM)
    )
}

/// Unsupported on this platform.
///
/// # Errors
///
/// Always returns `AppError::Process`.
#[cfg(not(unix))]
pub fn terminate_group(pid: u32) -> Result<()> {
    Err(AppError::Process(format!(
        "signals are not supported on this platform (pid {pid})"
    )))
}

/// Unsupported on this platform.
///
/// # Errors
///
/// Always returns `AppError::Process`.
#[cfg(not(unix))]
pub fn kill_group(pid: u32) -> Result<()> {
    terminate_group(pid)
}

/// Liveness checks are unsupported on this platform.
#[cfg(not(unix))]
#[must_use]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// Kill a stray process: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// PIDs in `protected_roots` (session shells, managed servers) are refused;
/// those are stopped through their owning manager instead.
///
/// # Errors
///
/// - `AppError::Protected` if `pid` is a protected root.
/// - `AppError::NotFound` if no such process exists.
/// - `AppError::Process` if a signal cannot be delivered.
pub async fn kill_process(pid: u32, protected_roots: &[u32], grace: Duration) -> Result<()> {
    if protected_roots.contains(&pid) {
        return Err(AppError::Protected(format!(
            "pid {pid} is a session root; stop the session instead"
        )));
    }
    if !is_alive(pid) {
        return Err(AppError::NotFound(format!("process {pid} not found")));
    }

    signal_single(pid, false)?;
    if wait_for_exit(pid, grace).await {
        info!(pid, "process exited after SIGTERM");
        return Ok(());
    }

    warn!(pid, "process ignored SIGTERM, sending SIGKILL");
    signal_single(pid, true)?;
    wait_for_exit(pid, grace).await;
    Ok(())
}

/// Poll until `pid` disappears or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while is_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    true
}

#[cfg(unix)]
fn signal_single(pid: u32, force: bool) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    match kill(to_nix_pid(pid)?, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::Process(format!("{signal} to {pid}: {err}"))),
    }
}

#[cfg(not(unix))]
fn signal_single(pid: u32, _force: bool) -> Result<()> {
    terminate_group(pid)
}
