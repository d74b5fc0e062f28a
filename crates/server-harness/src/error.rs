// crates/server-harness/src/error.rs
// ============================================================================
// Module: Harness Errors
// Description: Error taxonomy for launch, probe, and teardown operations.
// Purpose: Give callers stable variants to distinguish timeouts from crashes.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`HarnessError`] covers every failure surfaced by the harness. Launch
//! failures are reported only after the collaborator process group has been
//! terminated. HTTP error statuses are never errors; they are ordinary
//! [`crate::ProbeResult`] values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use thiserror::Error;

use crate::state::ExitOutcome;
use crate::state::ServerState;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the server lifecycle harness.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - `LaunchTimeout` and `LaunchCrashed` are only produced after teardown.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Launch spec failed validation.
    #[error("invalid launch spec: {0}")]
    InvalidSpec(String),
    /// The collaborator process could not be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS error description.
        message: String,
    },
    /// Health endpoint never succeeded while the process stayed alive.
    #[error(
        "server {name} (pid {pid}) not ready at {health_url} after {elapsed:?} and {attempts} attempts: {last_error}{}",
        excerpt_suffix(.stderr_excerpt)
    )]
    LaunchTimeout {
        /// Launch spec name.
        name: String,
        /// Collaborator process id.
        pid: u32,
        /// Health URL that was polled.
        health_url: String,
        /// Time spent waiting.
        elapsed: Duration,
        /// Number of health attempts issued.
        attempts: u32,
        /// Last health check failure.
        last_error: String,
        /// Tail of captured stderr, when captured.
        stderr_excerpt: Option<String>,
    },
    /// The process exited before the health endpoint succeeded.
    #[error(
        "server {name} (pid {pid}) exited before ready with {exit}{}",
        excerpt_suffix(.stderr_excerpt)
    )]
    LaunchCrashed {
        /// Launch spec name.
        name: String,
        /// Collaborator process id.
        pid: u32,
        /// Observed exit outcome.
        exit: ExitOutcome,
        /// Tail of captured stderr, when captured.
        stderr_excerpt: Option<String>,
    },
    /// Network-level failure reaching a ready server.
    #[error("probe transport failure for {method} {url}: {message}")]
    ProbeTransport {
        /// HTTP method label.
        method: String,
        /// Full request URL.
        url: String,
        /// Transport error description.
        message: String,
    },
    /// Probe attempted against a handle that is not READY.
    #[error("server handle is not ready (state {state})")]
    NotReady {
        /// Handle state at probe time.
        state: ServerState,
    },
    /// Capture sink could not be created or read.
    #[error("capture failure: {0}")]
    Capture(String),
    /// Signal delivery or process wait failed.
    #[error("process control failure for pid {pid}: {message}")]
    Signal {
        /// Target process id.
        pid: u32,
        /// OS error description.
        message: String,
    },
    /// Harness configuration was invalid.
    #[error("harness config error: {0}")]
    Config(String),
    /// Launch matrix document was invalid.
    #[error("launch matrix error: {0}")]
    Matrix(String),
    /// Response body could not be decoded into the requested type.
    #[error("probe decode failure: {0}")]
    Decode(String),
}

impl HarnessError {
    /// Returns true when a fresh launch attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LaunchTimeout { .. })
    }

    /// Returns the captured stderr excerpt attached to a launch failure.
    #[must_use]
    pub fn stderr_excerpt(&self) -> Option<&str> {
        match self {
            Self::LaunchTimeout {
                stderr_excerpt, ..
            }
            | Self::LaunchCrashed {
                stderr_excerpt, ..
            } => stderr_excerpt.as_deref(),
            _ => None,
        }
    }
}

/// Formats an optional stderr excerpt for error display.
fn excerpt_suffix(excerpt: &Option<String>) -> String {
    match excerpt {
        Some(text) if !text.trim().is_empty() => format!("\n--- stderr (tail) ---\n{text}"),
        _ => String::new(),
    }
}
