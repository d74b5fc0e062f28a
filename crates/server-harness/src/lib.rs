// crates/server-harness/src/lib.rs
// ============================================================================
// Module: Server Harness
// Description: Lifecycle harness for out-of-process HTTP collaborator servers.
// Purpose: Launch, probe, and deterministically tear down servers under test.
// Dependencies: libc, reqwest, serde, tempfile, thiserror, toml, tracing, url
// ============================================================================

//! ## Overview
//! The harness starts an inference server (or any HTTP collaborator) as a
//! separate process group, blocks until its health endpoint answers, lets the
//! test issue verification requests, and tears the whole process group down on
//! every exit path.
//!
//! ```no_run
//! use server_harness::Harness;
//! use server_harness::HttpRequestSpec;
//! use server_harness::LaunchSpec;
//!
//! # fn main() -> Result<(), server_harness::HarnessError> {
//! let spec = LaunchSpec::builder("python3", "http://127.0.0.1:21000")
//!     .program_arg("-m")
//!     .program_arg("inference.launch_server")
//!     .model("org/tiny-model")
//!     .build()?;
//! let harness = Harness::from_env()?;
//! let status = harness.scoped(&spec, |server| {
//!     server.probe(&HttpRequestSpec::health()).map(|result| result.status)
//! })??;
//! assert_eq!(status, 200);
//! # Ok(())
//! # }
//! ```
//!
//! Security posture: collaborators are trusted test infrastructure; the API
//! key is the only secret and is masked in rendered command lines.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod capture;
pub mod config;
pub mod error;
pub mod handle;
pub mod launch;
pub mod matrix;
pub mod observer;
pub mod probe;
pub mod process;
pub mod spec;
pub mod state;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use config::HarnessConfig;
pub use config::HarnessEnv;
pub use error::HarnessError;
pub use handle::ServerHandle;
pub use handle::TerminationReport;
pub use launch::Harness;
pub use launch::launch;
pub use matrix::LaunchMatrix;
pub use matrix::MatrixEntry;
pub use observer::HarnessEvent;
pub use observer::HarnessObserver;
pub use observer::NoopObserver;
pub use observer::RecordingObserver;
pub use observer::TracingObserver;
pub use observer::init_tracing;
pub use probe::BatchReport;
pub use probe::HttpRequestSpec;
pub use probe::LatencySummary;
pub use probe::ProbeResult;
pub use probe::probe_batch;
pub use process::is_alive;
pub use spec::LaunchArg;
pub use spec::LaunchSpec;
pub use spec::LaunchSpecBuilder;
pub use spec::OutputTarget;
pub use state::ExitOutcome;
pub use state::ServerState;

/// Issues one probe against a READY handle.
///
/// # Errors
///
/// See [`ServerHandle::probe`].
pub fn probe(handle: &ServerHandle, request: &HttpRequestSpec) -> Result<ProbeResult, HarnessError> {
    handle.probe(request)
}

/// Terminates a handle, returning the first teardown report on repeat calls.
///
/// # Errors
///
/// See [`ServerHandle::terminate`].
pub fn terminate(handle: &mut ServerHandle) -> Result<TerminationReport, HarnessError> {
    handle.terminate()
}
