// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Stub Server Harness
// Description: Helpers for launching the stub inference server in system-tests.
// Purpose: Provide deterministic launch specs, ports, and liveness polling.
// Dependencies: server-harness, system-tests
// ============================================================================

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use server_harness::Harness;
use server_harness::HarnessConfig;
use server_harness::LaunchSpec;
use server_harness::LaunchSpecBuilder;
use server_harness::RecordingObserver;
use server_harness::init_tracing;
use server_harness::is_alive;
use system_tests::config::SystemTestConfig;

/// Model identifier passed to the stub.
pub const STUB_MODEL: &str = "stub/tiny-model";

/// Returns a base URL on a free loopback port.
pub fn allocate_base_url() -> Result<String, String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("failed to bind loopback: {err}"))?;
    let addr =
        listener.local_addr().map_err(|err| format!("failed to read listener address: {err}"))?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

/// Returns the collaborator binary: the configured override or the bundled stub.
pub fn stub_program() -> PathBuf {
    SystemTestConfig::load()
        .ok()
        .and_then(|config| config.stub_program)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_BIN_EXE_stub_inference_server")))
}

/// Launch spec builder for the stub on a fresh port.
pub fn stub_spec() -> Result<LaunchSpecBuilder, String> {
    let base_url = allocate_base_url()?;
    Ok(stub_spec_at(&base_url))
}

/// Launch spec builder for the stub at `base_url`.
pub fn stub_spec_at(base_url: &str) -> LaunchSpecBuilder {
    LaunchSpec::builder(stub_program().display().to_string(), base_url)
        .model(STUB_MODEL)
        .startup_timeout(Duration::from_secs(30))
        .poll_interval(Duration::from_millis(100))
        .grace_period(Duration::from_secs(3))
}

/// Harness honoring `SERVER_HARNESS_*` settings, with captures under `run_root`.
pub fn harness(run_root: Option<PathBuf>) -> Harness {
    init_tracing();
    let mut config = HarnessConfig::load().unwrap_or_default();
    if config.run_root.is_none() {
        config.run_root = run_root;
    }
    Harness::new(config)
}

/// Harness that also records lifecycle events.
pub fn recording_harness(run_root: Option<PathBuf>) -> (Harness, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let harness = harness(run_root).with_observer(observer.clone());
    (harness, observer)
}

/// Waits until `pid` is gone; returns false on timeout.
pub fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    !is_alive(pid)
}
