// crates/server-harness/src/handle.rs
// ============================================================================
// Module: Server Handle
// Description: Owned handle for a launched collaborator process.
// Purpose: Enforce exactly-once teardown with graceful-then-forceful shutdown.
// Dependencies: reqwest, libc (via process)
// ============================================================================

//! ## Overview
//! A [`ServerHandle`] owns the collaborator [`Child`], its capture sinks, and
//! the HTTP client used for probes. Teardown runs exactly once: explicitly via
//! [`ServerHandle::terminate`], or from `Drop` on every other exit path
//! including panics in the calling test.
//! Invariants:
//! - `terminate` is idempotent and returns the first report on repeat calls.
//! - A handle is never shared across scopes; probes borrow it immutably.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::capture::CaptureSinks;
use crate::error::HarnessError;
use crate::observer::HarnessEvent;
use crate::observer::HarnessObserver;
use crate::probe::HttpRequestSpec;
use crate::probe::ProbeResult;
use crate::probe::send_probe;
use crate::process::Delivery;
use crate::process::ShutdownSignal;
use crate::process::signal_group;
use crate::state::ExitOutcome;
use crate::state::ServerState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Interval between exit checks while waiting out the grace period.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// SECTION: Termination Report
// ============================================================================

/// Summary of a completed teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    /// Exit outcome of the process-group leader.
    pub exit: ExitOutcome,
    /// True when the leader had to be killed after the grace period.
    pub forced: bool,
    /// True when the leader had already exited before teardown began.
    pub exited_before_terminate: bool,
    /// Time spent in teardown.
    pub elapsed: Duration,
}

// ============================================================================
// SECTION: Server Handle
// ============================================================================

/// Handle for a launched collaborator process.
pub struct ServerHandle {
    /// Launch spec name.
    name: String,
    /// Process id (also the process-group id).
    pid: u32,
    /// Base URL without trailing slash.
    base_url: String,
    /// Optional bearer token attached to probes.
    api_key: Option<String>,
    /// Lifecycle state.
    state: ServerState,
    /// Owned child process; reaped during teardown.
    child: Child,
    /// Output sinks.
    capture: CaptureSinks,
    /// HTTP client shared by health checks and probes.
    client: Client,
    /// Wait between SIGTERM and SIGKILL.
    grace_period: Duration,
    /// Event sink.
    observer: Arc<dyn HarnessObserver>,
    /// Cached report from the first teardown.
    report: Option<TerminationReport>,
}

impl ServerHandle {
    /// Wraps a freshly spawned child in STARTING state.
    #[allow(clippy::too_many_arguments, reason = "Internal constructor mirrors handle fields.")]
    pub(crate) fn starting(
        name: String,
        child: Child,
        base_url: String,
        api_key: Option<String>,
        capture: CaptureSinks,
        client: Client,
        grace_period: Duration,
        observer: Arc<dyn HarnessObserver>,
    ) -> Self {
        Self {
            name,
            pid: child.id(),
            base_url,
            api_key,
            state: ServerState::Starting,
            child,
            capture,
            client,
            grace_period,
            observer,
            report: None,
        }
    }

    /// Returns the launch spec name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the teardown report once terminated.
    #[must_use]
    pub const fn termination_report(&self) -> Option<&TerminationReport> {
        self.report.as_ref()
    }

    /// Returns the captured stdout path, when captured and still present.
    #[must_use]
    pub fn stdout_path(&self) -> Option<&Path> {
        self.capture.stdout_path()
    }

    /// Returns the captured stderr path, when captured and still present.
    #[must_use]
    pub fn stderr_path(&self) -> Option<&Path> {
        self.capture.stderr_path()
    }

    /// Reads captured stdout.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Capture`] when the capture file cannot be read.
    pub fn read_stdout(&self) -> Result<Option<String>, HarnessError> {
        self.capture.read_stdout()
    }

    /// Reads captured stderr.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Capture`] when the capture file cannot be read.
    pub fn read_stderr(&self) -> Result<Option<String>, HarnessError> {
        self.capture.read_stderr()
    }

    /// Returns the tail of captured stderr.
    #[must_use]
    pub fn stderr_excerpt(&self) -> Option<String> {
        self.capture.stderr_excerpt()
    }

    /// Checks whether the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Signal`] when the OS wait call fails.
    pub fn try_exit(&mut self) -> Result<Option<ExitOutcome>, HarnessError> {
        self.child
            .try_wait()
            .map(|status| status.map(ExitOutcome::from))
            .map_err(|err| self.signal_error(&err))
    }

    /// Issues one HTTP request against the server. Never retries.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotReady`] when the handle is not READY and
    /// [`HarnessError::ProbeTransport`] on connection-level failures. HTTP
    /// error statuses are returned as ordinary results.
    pub fn probe(&self, request: &HttpRequestSpec) -> Result<ProbeResult, HarnessError> {
        if self.state != ServerState::Ready {
            return Err(HarnessError::NotReady {
                state: self.state,
            });
        }
        let outcome = send_probe(&self.client, &self.base_url, self.api_key.as_deref(), request);
        let (status, latency) = match &outcome {
            Ok(result) => (Some(result.status), result.latency),
            Err(_) => (None, Duration::ZERO),
        };
        self.observer.on_event(&HarnessEvent::Probed {
            pid: self.pid,
            method: request.method().to_string(),
            path: request.path().to_string(),
            status,
            latency,
        });
        outcome
    }

    /// Shuts the process group down and closes capture sinks.
    ///
    /// Sends SIGTERM to the group, waits up to the grace period for the leader,
    /// then sends SIGKILL to the group so stragglers are swept as well.
    /// Calling this on a TERMINATED handle returns the first report.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Signal`] when signal delivery or reaping fails.
    /// The handle still transitions to TERMINATED in that case.
    pub fn terminate(&mut self) -> Result<TerminationReport, HarnessError> {
        if let Some(report) = self.report {
            return Ok(report);
        }
        if self.state == ServerState::Starting {
            self.state = ServerState::Failed;
        }
        let started = Instant::now();
        let outcome = self.shutdown_group();
        self.capture.close();
        self.state = ServerState::Terminated;
        let (exit, forced, exited_before_terminate) = match outcome {
            Ok(values) => values,
            Err(err) => {
                self.report = Some(TerminationReport {
                    exit: ExitOutcome::Unknown,
                    forced: true,
                    exited_before_terminate: false,
                    elapsed: started.elapsed(),
                });
                return Err(err);
            }
        };
        let report = TerminationReport {
            exit,
            forced,
            exited_before_terminate,
            elapsed: started.elapsed(),
        };
        self.report = Some(report);
        self.observer.on_event(&HarnessEvent::Terminated {
            pid: self.pid,
            exit,
            forced,
            elapsed: report.elapsed,
        });
        Ok(report)
    }

    /// Marks a STARTING handle READY.
    pub(crate) fn mark_ready(&mut self) {
        if self.state.can_transition_to(ServerState::Ready) {
            self.state = ServerState::Ready;
        }
    }

    /// Marks a STARTING handle FAILED.
    pub(crate) fn mark_failed(&mut self) {
        if self.state.can_transition_to(ServerState::Failed) {
            self.state = ServerState::Failed;
        }
    }

    /// Returns the client used for health checks.
    pub(crate) const fn client(&self) -> &Client {
        &self.client
    }

    /// Runs the signal sequence and reaps the leader.
    fn shutdown_group(&mut self) -> Result<(ExitOutcome, bool, bool), HarnessError> {
        if let Some(status) = self.child.try_wait().map_err(|err| self.signal_error(&err))? {
            self.sweep_group()?;
            return Ok((ExitOutcome::from(status), false, true));
        }
        self.send(ShutdownSignal::Terminate)?;
        let deadline = Instant::now() + self.grace_period;
        loop {
            if let Some(status) = self.child.try_wait().map_err(|err| self.signal_error(&err))? {
                self.sweep_group()?;
                return Ok((ExitOutcome::from(status), false, false));
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        self.send(ShutdownSignal::Kill)?;
        let status = self.child.wait().map_err(|err| self.signal_error(&err))?;
        Ok((ExitOutcome::from(status), true, false))
    }

    /// Kills any group members that outlived the leader.
    fn sweep_group(&mut self) -> Result<(), HarnessError> {
        self.send(ShutdownSignal::Kill).map(|_| ())
    }

    /// Delivers a signal to the group, falling back to `Child::kill` off unix.
    fn send(&mut self, signal: ShutdownSignal) -> Result<Delivery, HarnessError> {
        match signal_group(self.pid, signal) {
            Ok(delivery) => Ok(delivery),
            Err(err) if err.kind() == std::io::ErrorKind::Unsupported => {
                if self.child.try_wait().map_err(|err| self.signal_error(&err))?.is_some() {
                    return Ok(Delivery::NoSuchProcess);
                }
                self.child.kill().map_err(|err| self.signal_error(&err))?;
                Ok(Delivery::Delivered)
            }
            Err(err) => Err(self.signal_error(&err)),
        }
    }

    /// Wraps an OS error for this process.
    fn signal_error(&self, err: &std::io::Error) -> HarnessError {
        HarnessError::Signal {
            pid: self.pid,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("base_url", &self.base_url)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.report.is_some() {
            return;
        }
        if let Err(err) = self.terminate() {
            tracing::warn!(pid = self.pid, error = %err, "teardown on drop failed");
        }
    }
}
