// crates/server-harness/src/state.rs
// ============================================================================
// Module: Handle State
// Description: Lifecycle states and exit outcomes for collaborator processes.
// Purpose: Encode the STARTING -> READY | FAILED -> TERMINATED state machine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`ServerState`] only moves forward. `Starting` resolves to `Ready` or
//! `Failed` inside `launch`; `Ready` and `Failed` are the only states from
//! which `Terminated` is reachable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::process::ExitStatus;

use serde::Serialize;

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Liveness state of a server handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Process spawned, health endpoint not yet successful.
    Starting,
    /// Health endpoint returned success.
    Ready,
    /// Launch failed by timeout or crash.
    Failed,
    /// Teardown completed.
    Terminated,
}

impl ServerState {
    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Returns true when moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Ready | Self::Failed)
                | (Self::Ready | Self::Failed, Self::Terminated)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Exit Outcome
// ============================================================================

/// Observed exit of a collaborator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitOutcome {
    /// Normal exit with a status code.
    Code(i32),
    /// Terminated by a signal.
    Signal(i32),
    /// Platform reported neither a code nor a signal.
    Unknown,
}

impl ExitOutcome {
    /// Returns true for a zero exit code.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Returns the exit code when the process exited normally.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(code),
            Self::Signal(_) | Self::Unknown => None,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Unknown => f.write_str("unknown exit status"),
        }
    }
}
