// crates/server-harness/src/process.rs
// ============================================================================
// Module: Process Control
// Description: Process-group signalling and liveness checks.
// Purpose: Deliver graceful-then-forceful shutdown to a collaborator tree.
// Dependencies: libc
// ============================================================================

//! ## Overview
//! Collaborators are spawned as process-group leaders, so signalling the group
//! reaches every descendant that did not detach itself. A missing group
//! (`ESRCH`) is treated as already gone.

#![allow(unsafe_code, reason = "Signal delivery requires libc::kill on unix.")]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;

// ============================================================================
// SECTION: Signals
// ============================================================================

/// Shutdown signal sent to a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Cooperative termination (SIGTERM).
    Terminate,
    /// Unconditional kill (SIGKILL).
    Kill,
}

/// Outcome of a signal delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Signal delivered to at least one process.
    Delivered,
    /// No process matched the target.
    NoSuchProcess,
}

/// Sends `signal` to the process group led by `pgid`.
///
/// # Errors
///
/// Returns the OS error for failures other than `ESRCH`.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: ShutdownSignal) -> io::Result<Delivery> {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"));
    };
    if pgid <= 1 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pgid <= 1"));
    }
    let signo = match signal {
        ShutdownSignal::Terminate => libc::SIGTERM,
        ShutdownSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) takes plain integers and touches no memory. A negative
    // pid targets the process group; pgid > 1 is checked above so this never
    // becomes kill(0, ..) or kill(-1, ..).
    let ret = unsafe { libc::kill(-pgid, signo) };
    if ret == 0 {
        return Ok(Delivery::Delivered);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(Delivery::NoSuchProcess);
    }
    Err(err)
}

/// Sends `signal` to the process group led by `pgid`.
///
/// Non-unix platforms have no process groups; callers fall back to `Child::kill`.
///
/// # Errors
///
/// Always returns `Unsupported`.
#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: ShutdownSignal) -> io::Result<Delivery> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "process groups require unix"))
}

// ============================================================================
// SECTION: Liveness
// ============================================================================

/// Returns true when `pid` names a live, non-zombie process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // Format: "pid (comm) state ..."; comm may contain spaces or parentheses.
    let Some(after_comm) = stat.rfind(')').map(|idx| &stat[idx + 1..]) else {
        return false;
    };
    !matches!(after_comm.split_whitespace().next(), Some("Z" | "X" | "x"))
}

/// Returns true when `pid` names a live process.
#[cfg(all(unix, not(target_os = "linux")))]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs an existence check and delivers nothing.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Returns true when `pid` names a live process.
#[cfg(not(unix))]
#[must_use]
pub fn is_alive(_pid: u32) -> bool {
    false
}

// ============================================================================
// SECTION: Tests
// ============================================================================
