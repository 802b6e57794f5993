//! Process liveness and signalling utilities
//!
//! Workers are independent OS processes, so every piece of registry state
//! is ultimately checked against the process table. The probe here never
//! delivers a real signal: it uses the null signal to test for existence.

use std::io;

/// Result of probing a PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process exists and we may signal it
    Running,
    /// Process exists but belongs to someone else
    PermissionDenied,
    /// No such process (never existed, exited, or a zombie)
    NotFound,
}

impl ProcessState {
    /// Whether the process should be treated as alive
    ///
    /// A permission failure proves the PID exists, so it counts as alive.
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::PermissionDenied)
    }
}

/// Source of liveness information, injected into components that reconcile state
pub trait LivenessProbe: Send + Sync {
    /// Probe the given PID
    fn probe(&self, pid: u32) -> ProcessState;

    /// Check if the given PID is alive
    fn is_alive(&self, pid: u32) -> bool {
        self.probe(pid).is_alive()
    }
}

/// Liveness probe backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProbe;

impl LivenessProbe for OsProbe {
    fn probe(&self, pid: u32) -> ProcessState {
        probe(pid)
    }
}

/// Probe a PID with `kill(pid, 0)`
///
/// ESRCH maps to `NotFound`, EPERM to `PermissionDenied`. PID 0 and values
/// outside the `pid_t` range are never valid worker PIDs.
#[cfg(unix)]
pub fn probe(pid: u32) -> ProcessState {
    let Some(raw) = to_pid_t(pid) else {
        return ProcessState::NotFound;
    };

    // SAFETY: signal 0 performs only the existence and permission checks.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        if is_zombie(pid) {
            return ProcessState::NotFound;
        }
        return ProcessState::Running;
    }

    match io::Error::last_os_error().raw_os_error() {
        Some(libc::EPERM) => ProcessState::PermissionDenied,
        _ => ProcessState::NotFound,
    }
}

#[cfg(not(unix))]
pub fn probe(_pid: u32) -> ProcessState {
    ProcessState::NotFound
}

/// Check if a process with the given PID is still alive
pub fn is_process_alive(pid: u32) -> bool {
    probe(pid).is_alive()
}

/// Ask a process to shut down (SIGTERM)
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGTERM)
}

/// Forcefully kill a process (SIGKILL)
#[cfg(unix)]
pub fn kill(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGKILL)
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(not(unix))]
pub fn kill(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let raw = to_pid_t(pid).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid PID {}", pid))
    })?;

    // SAFETY: raw is a positive PID, so this never targets a process group.
    if unsafe { libc::kill(raw, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(raw) if raw > 0 => Some(raw),
        _ => None,
    }
}

/// Zombies still answer the null signal until their parent reaps them
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The command name may contain spaces; the state follows the last ')'
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|state| state == "Z")
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}
