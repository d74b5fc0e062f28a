// crates/server-harness/src/launch.rs
// ============================================================================
// Module: Launch
// Description: Spawn collaborators and block until they answer health checks.
// Purpose: Turn a LaunchSpec into a READY handle or a post-teardown error.
// Dependencies: reqwest, std::process
// ============================================================================

//! ## Overview
//! [`Harness::launch`] spawns the collaborator as its own process-group leader
//! and polls the health URL at the spec's poll interval. Before every health
//! attempt the process is checked for exit, so a crash is reported as
//! [`HarnessError::LaunchCrashed`] rather than waiting out the timeout.
//! Security posture: the collaborator is trusted test infrastructure; only the
//! API key is masked in diagnostics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use reqwest::blocking::Client;

use crate::capture::CaptureSinks;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::handle::ServerHandle;
use crate::observer::HarnessEvent;
use crate::observer::HarnessObserver;
use crate::observer::TracingObserver;
use crate::probe::error_chain;
use crate::spec::LaunchSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound on a single health request.
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Connect timeout for the shared client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Launches collaborators with explicit configuration and observer.
#[derive(Clone)]
pub struct Harness {
    /// Resolved harness configuration.
    config: HarnessConfig,
    /// Event sink shared with every handle this harness creates.
    observer: Arc<dyn HarnessObserver>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(HarnessConfig::default())
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Harness {
    /// Creates a harness with the tracing observer.
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Creates a harness from `SERVER_HARNESS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] when a variable is invalid.
    pub fn from_env() -> Result<Self, HarnessError> {
        HarnessConfig::load().map(Self::new)
    }

    /// Replaces the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn HarnessObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Spawns the collaborator and blocks until it is READY.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] or [`HarnessError::Capture`] when the
    /// process cannot be started, [`HarnessError::LaunchCrashed`] when it exits
    /// before readiness, and [`HarnessError::LaunchTimeout`] when the startup
    /// timeout elapses. The process group is terminated before either launch
    /// failure is returned.
    pub fn launch(&self, spec: &LaunchSpec) -> Result<ServerHandle, HarnessError> {
        let (capture, stdout, stderr) = CaptureSinks::open(
            spec.name(),
            spec.stdout(),
            spec.stderr(),
            self.config.run_root.as_deref(),
            self.config.keep_captures,
        )?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| HarnessError::Spawn {
                program: spec.program().to_string(),
                message: format!("http client build failed: {}", error_chain(&err)),
            })?;
        let child = spawn(spec, stdout, stderr)?;
        let started = Instant::now();
        let mut handle = ServerHandle::starting(
            spec.name().to_string(),
            child,
            spec.base_url(),
            spec.api_key().map(str::to_string),
            capture,
            client,
            spec.grace_period(),
            Arc::clone(&self.observer),
        );
        self.observer.on_event(&HarnessEvent::Spawned {
            name: spec.name().to_string(),
            pid: handle.pid(),
            command: spec.command_line(),
        });
        match self.wait_ready(spec, &mut handle, started) {
            Ok(attempts) => {
                handle.mark_ready();
                self.observer.on_event(&HarnessEvent::Ready {
                    pid: handle.pid(),
                    base_url: handle.base_url().to_string(),
                    attempts,
                    elapsed: started.elapsed(),
                });
                Ok(handle)
            }
            Err(err) => {
                handle.mark_failed();
                let elapsed = started.elapsed();
                if let Err(teardown) = handle.terminate() {
                    tracing::warn!(pid = handle.pid(), error = %teardown, "teardown after failed launch failed");
                }
                self.observer.on_event(&HarnessEvent::LaunchFailed {
                    pid: handle.pid(),
                    reason: failure_reason(&err),
                    elapsed,
                });
                Err(err)
            }
        }
    }

    /// Launches up to `attempts` times, retrying only on startup timeouts.
    ///
    /// `attempts` of zero uses the configured default.
    ///
    /// # Errors
    ///
    /// Returns the last launch error, or the first non-retryable error.
    pub fn launch_with_retry(
        &self,
        spec: &LaunchSpec,
        attempts: u32,
    ) -> Result<ServerHandle, HarnessError> {
        let attempts = if attempts == 0 { self.config.launch_attempts.max(1) } else { attempts };
        let mut attempt = 1;
        loop {
            match self.launch(spec) {
                Ok(handle) => return Ok(handle),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        name = spec.name(),
                        attempt,
                        attempts,
                        error = %err,
                        "launch attempt failed; retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Launches, runs `body` against the READY handle, and terminates on every
    /// exit path, including a panic inside `body`.
    ///
    /// # Errors
    ///
    /// Returns launch errors. Teardown errors are logged because the handle's
    /// `Drop` path cannot propagate them.
    pub fn scoped<T>(
        &self,
        spec: &LaunchSpec,
        body: impl FnOnce(&mut ServerHandle) -> T,
    ) -> Result<T, HarnessError> {
        let mut handle = self.launch(spec)?;
        let output = body(&mut handle);
        if let Err(err) = handle.terminate() {
            tracing::warn!(pid = handle.pid(), error = %err, "scoped teardown failed");
        }
        Ok(output)
    }

    /// Polls health until success, exit, or timeout; returns the attempt count.
    fn wait_ready(
        &self,
        spec: &LaunchSpec,
        handle: &mut ServerHandle,
        started: Instant,
    ) -> Result<u32, HarnessError> {
        let timeout = self.config.resolve_timeout(spec.startup_timeout());
        let health_url = spec.health_url();
        let mut attempts: u32 = 0;
        let mut last_error = String::from("no health attempt completed");
        loop {
            if let Some(exit) = handle.try_exit()? {
                return Err(HarnessError::LaunchCrashed {
                    name: spec.name().to_string(),
                    pid: handle.pid(),
                    exit,
                    stderr_excerpt: handle.stderr_excerpt(),
                });
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(HarnessError::LaunchTimeout {
                    name: spec.name().to_string(),
                    pid: handle.pid(),
                    health_url,
                    elapsed: started.elapsed(),
                    attempts,
                    last_error,
                    stderr_excerpt: handle.stderr_excerpt(),
                });
            }
            attempts += 1;
            match check_health(handle.client(), &health_url, spec.api_key(), remaining) {
                Ok(()) => return Ok(attempts),
                Err(detail) => {
                    self.observer.on_event(&HarnessEvent::HealthPending {
                        pid: handle.pid(),
                        attempt: attempts,
                        detail: detail.clone(),
                    });
                    last_error = detail;
                }
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            thread::sleep(spec.poll_interval().min(remaining));
        }
    }
}

// ============================================================================
// SECTION: Free Functions
// ============================================================================

/// Launches with a default [`Harness`].
///
/// # Errors
///
/// See [`Harness::launch`].
pub fn launch(spec: &LaunchSpec) -> Result<ServerHandle, HarnessError> {
    Harness::default().launch(spec)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Spawns the collaborator as a process-group leader with stdin closed.
fn spawn(
    spec: &LaunchSpec,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<std::process::Child, HarnessError> {
    let mut command = Command::new(spec.program());
    command.args(spec.argv()).envs(spec.env()).stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    for key in spec.env_remove() {
        command.env_remove(key);
    }
    if let Some(dir) = spec.working_dir() {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.spawn().map_err(|err| HarnessError::Spawn {
        program: spec.program().to_string(),
        message: err.to_string(),
    })
}

/// Stable `LaunchFailed` label for a readiness error.
const fn failure_reason(err: &HarnessError) -> &'static str {
    match err {
        HarnessError::LaunchCrashed { .. } => "crashed",
        HarnessError::LaunchTimeout { .. } => "timeout",
        _ => "error",
    }
}

/// Issues one health request; returns a failure description on non-2xx or
/// transport errors.
fn check_health(
    client: &Client,
    health_url: &str,
    api_key: Option<&str>,
    remaining: Duration,
) -> Result<(), String> {
    let mut request = client.get(health_url).timeout(HEALTH_REQUEST_TIMEOUT.min(remaining));
    if let Some(api_key) = api_key {
        request = request.bearer_auth(api_key);
    }
    match request.send() {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) => Err(format!("status {}", response.status().as_u16())),
        Err(err) => Err(error_chain(&err)),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
