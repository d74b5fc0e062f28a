// system-tests/tests/suites/lifecycle.rs
// ============================================================================
// Module: Lifecycle Tests
// Description: Launch, readiness, and teardown of the stub inference server.
// Purpose: Validate that every launched process group is gone after teardown.
// Dependencies: system-tests helpers, server-harness
// ============================================================================

//! ## Overview
//! Drives the stub through the full lifecycle: ready, probed, and terminated
//! on the normal path, after a failed assertion, with a grandchild in the
//! group, and with SIGTERM ignored.

use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use helpers::artifacts::TestReporter;
use helpers::harness::recording_harness;
use helpers::harness::stub_spec;
use helpers::harness::wait_gone;
use serde_json::Value;
use server_harness::ExitOutcome;
use server_harness::HttpRequestSpec;
use server_harness::ServerState;
use server_harness::is_alive;

use crate::helpers;

const GONE_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn stub_launches_probes_and_terminates() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("stub_launches_probes_and_terminates")?;
    let (harness, observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("lifecycle-basic").build()?;

    let mut handle = harness.launch(&spec)?;
    let pid = handle.pid();
    assert_eq!(handle.state(), ServerState::Ready);
    assert!(is_alive(pid), "stub should be alive once ready");

    let health = handle.probe(&HttpRequestSpec::health())?;
    assert_eq!(health.status, 200);

    let first = handle.terminate()?;
    let second = handle.terminate()?;
    assert_eq!(first, second, "terminate must be idempotent");
    assert_eq!(first.exit, ExitOutcome::Code(0), "stub exits cleanly on SIGTERM");
    assert!(!first.forced);
    assert_eq!(handle.state(), ServerState::Terminated);
    assert!(wait_gone(pid, GONE_TIMEOUT), "pid {pid} still alive after terminate");

    let kinds = observer.kinds();
    assert_eq!(kinds.first(), Some(&"spawned"));
    assert_eq!(kinds.last(), Some(&"terminated"));
    assert_eq!(kinds.iter().filter(|kind| **kind == "terminated").count(), 1);

    reporter.attach_json("termination.json", &first)?;
    reporter.note(format!("stub pid {pid} exited with {:?}", first.exit));
    reporter.pass()?;
    Ok(())
}

#[test]
fn failed_assertion_still_terminates_server() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("failed_assertion_still_terminates_server")?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("lifecycle-assertion").build()?;
    let observed_pid = Cell::new(0_u32);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        harness.scoped(&spec, |handle| {
            observed_pid.set(handle.pid());
            let health = handle.probe(&HttpRequestSpec::health()).ok().map(|result| result.status);
            assert_eq!(health, Some(500), "deliberately failing assertion");
        })
    }));

    assert!(outcome.is_err(), "assertion inside the scope should unwind");
    let pid = observed_pid.get();
    assert_ne!(pid, 0, "scope body never ran");
    assert!(wait_gone(pid, GONE_TIMEOUT), "pid {pid} survived a failed assertion");

    reporter.note(format!("pid {pid} torn down after panic"));
    reporter.pass()?;
    Ok(())
}

#[test]
fn grandchild_is_swept_with_the_group() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("grandchild_is_swept_with_the_group")?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("lifecycle-grandchild").arg("--spawn-child").build()?;

    let mut handle = harness.launch(&spec)?;
    let info = handle.probe(&HttpRequestSpec::server_info())?;
    let child_pid = info
        .pointer("/child_pid")
        .and_then(Value::as_u64)
        .and_then(|pid| u32::try_from(pid).ok())
        .ok_or("server info did not report a child pid")?;
    assert!(is_alive(child_pid), "grandchild should be running before teardown");

    let report = handle.terminate()?;
    assert!(wait_gone(handle.pid(), GONE_TIMEOUT));
    assert!(wait_gone(child_pid, GONE_TIMEOUT), "grandchild {child_pid} outlived teardown");

    reporter.note(format!("leader exit {:?}, grandchild {child_pid} swept", report.exit));
    reporter.pass()?;
    Ok(())
}

#[test]
fn sigterm_ignoring_server_is_killed_after_grace() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("sigterm_ignoring_server_is_killed_after_grace")?;
    let (harness, observer) = recording_harness(Some(reporter.captures_dir()));
    let grace = Duration::from_millis(500);
    let spec = stub_spec()?
        .name("lifecycle-stubborn")
        .arg("--ignore-sigterm")
        .grace_period(grace)
        .build()?;

    let mut handle = harness.launch(&spec)?;
    let pid = handle.pid();
    let report = handle.terminate()?;
    assert!(report.forced, "leader should need SIGKILL");
    assert_eq!(report.exit, ExitOutcome::Signal(9));
    assert!(report.elapsed >= grace);
    assert!(wait_gone(pid, GONE_TIMEOUT));

    let terminated = observer.events().into_iter().filter(|event| event.kind() == "terminated").count();
    assert_eq!(terminated, 1);

    reporter.note(format!("forced teardown took {:?}", report.elapsed));
    reporter.pass()?;
    Ok(())
}

#[test]
fn dropped_handle_terminates_server() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("dropped_handle_terminates_server")?;
    let (harness, observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("lifecycle-drop").build()?;

    let handle = harness.launch(&spec)?;
    let pid = handle.pid();
    drop(handle);
    assert!(wait_gone(pid, GONE_TIMEOUT), "pid {pid} survived drop");
    assert_eq!(observer.kinds().last(), Some(&"terminated"));

    reporter.note(format!("pid {pid} terminated on drop"));
    reporter.pass()?;
    Ok(())
}
