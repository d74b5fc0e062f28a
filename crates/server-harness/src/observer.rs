// crates/server-harness/src/observer.rs
// ============================================================================
// Module: Harness Observer
// Description: Lifecycle event hooks and structured logging for the harness.
// Purpose: Report launch, probe, and teardown events without global state.
// Dependencies: tracing, tracing-subscriber
// ============================================================================

//! ## Overview
//! Every lifecycle transition is reported to a [`HarnessObserver`] owned by the
//! [`crate::Harness`] that created the handle. [`TracingObserver`] turns events
//! into structured `tracing` records; [`RecordingObserver`] keeps them in memory
//! for assertions. Observers must not block.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::config::HarnessEnv;
use crate::state::ExitOutcome;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Lifecycle event emitted by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessEvent {
    /// Collaborator process spawned.
    Spawned {
        /// Launch spec name.
        name: String,
        /// Process id.
        pid: u32,
        /// Rendered command line with secrets masked.
        command: String,
    },
    /// A health attempt did not succeed yet.
    HealthPending {
        /// Process id.
        pid: u32,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Failure detail (status or transport error).
        detail: String,
    },
    /// Health endpoint succeeded.
    Ready {
        /// Process id.
        pid: u32,
        /// Base URL of the server.
        base_url: String,
        /// Attempts needed.
        attempts: u32,
        /// Time from spawn to ready.
        elapsed: Duration,
    },
    /// Launch failed before readiness.
    LaunchFailed {
        /// Process id.
        pid: u32,
        /// Stable failure label (`timeout`, `crashed`, or `error`).
        reason: &'static str,
        /// Time from spawn to failure.
        elapsed: Duration,
    },
    /// A probe completed (successfully or with a transport error).
    Probed {
        /// Process id.
        pid: u32,
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Status code when a response arrived.
        status: Option<u16>,
        /// Round-trip latency.
        latency: Duration,
    },
    /// Teardown completed.
    Terminated {
        /// Process id.
        pid: u32,
        /// Exit outcome of the process.
        exit: ExitOutcome,
        /// Whether SIGKILL was needed for the leader.
        forced: bool,
        /// Time spent in teardown.
        elapsed: Duration,
    },
}

impl HarnessEvent {
    /// Returns the process id the event refers to.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        match self {
            Self::Spawned {
                pid, ..
            }
            | Self::HealthPending {
                pid, ..
            }
            | Self::Ready {
                pid, ..
            }
            | Self::LaunchFailed {
                pid, ..
            }
            | Self::Probed {
                pid, ..
            }
            | Self::Terminated {
                pid, ..
            } => *pid,
        }
    }

    /// Returns a stable label for the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Spawned { .. } => "spawned",
            Self::HealthPending { .. } => "health_pending",
            Self::Ready { .. } => "ready",
            Self::LaunchFailed { .. } => "launch_failed",
            Self::Probed { .. } => "probed",
            Self::Terminated { .. } => "terminated",
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Sink for harness lifecycle events.
pub trait HarnessObserver: Send + Sync {
    /// Records one event.
    fn on_event(&self, event: &HarnessEvent);
}

/// No-op observer.
pub struct NoopObserver;

impl HarnessObserver for NoopObserver {
    fn on_event(&self, _event: &HarnessEvent) {}
}

/// Observer that emits structured `tracing` records.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl HarnessObserver for TracingObserver {
    fn on_event(&self, event: &HarnessEvent) {
        match event {
            HarnessEvent::Spawned {
                name,
                pid,
                command,
            } => tracing::info!(name = %name, pid, command = %command, "collaborator spawned"),
            HarnessEvent::HealthPending {
                pid,
                attempt,
                detail,
            } => tracing::debug!(pid, attempt, detail = %detail, "health check pending"),
            HarnessEvent::Ready {
                pid,
                base_url,
                attempts,
                elapsed,
            } => tracing::info!(
                pid,
                base_url = %base_url,
                attempts,
                elapsed_ms = duration_ms(*elapsed),
                "collaborator ready"
            ),
            HarnessEvent::LaunchFailed {
                pid,
                reason,
                elapsed,
            } => tracing::warn!(
                pid,
                reason = *reason,
                elapsed_ms = duration_ms(*elapsed),
                "collaborator launch failed"
            ),
            HarnessEvent::Probed {
                pid,
                method,
                path,
                status,
                latency,
            } => tracing::debug!(
                pid,
                method = %method,
                path = %path,
                status = ?status,
                latency_ms = duration_ms(*latency),
                "probe completed"
            ),
            HarnessEvent::Terminated {
                pid,
                exit,
                forced,
                elapsed,
            } => tracing::info!(
                pid,
                exit = %exit,
                forced,
                elapsed_ms = duration_ms(*elapsed),
                "collaborator terminated"
            ),
        }
    }
}

/// Observer that keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    /// Recorded events in arrival order.
    events: Mutex<Vec<HarnessEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HarnessEvent> {
        self.events.lock().map_or_else(|_| Vec::new(), |events| events.clone())
    }

    /// Returns the kinds of recorded events in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(HarnessEvent::kind).collect()
    }
}

impl HarnessObserver for RecordingObserver {
    fn on_event(&self, event: &HarnessEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Subscriber Setup
// ============================================================================

/// Default filter when `SERVER_HARNESS_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Installs a stderr `tracing` subscriber filtered by `SERVER_HARNESS_LOG`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = std::env::var(HarnessEnv::Log.as_str())
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Converts a duration to whole milliseconds for log fields.
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
