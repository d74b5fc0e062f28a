// system-tests/tests/suites/launch_matrix.rs
// ============================================================================
// Module: Launch Matrix Tests
// Description: TOML launch matrices driving the stub inference server.
// Purpose: Validate that matrix entries render into launchable specs.
// Dependencies: system-tests helpers, server-harness, serde_json
// ============================================================================

//! ## Overview
//! Writes a matrix that points at the stub binary, launches each entry, and
//! compares measured behavior against the entry's thresholds.

use std::time::Duration;

use helpers::artifacts::TestReporter;
use helpers::harness::allocate_base_url;
use helpers::harness::recording_harness;
use helpers::harness::stub_program;
use helpers::harness::wait_gone;
use serde_json::Value;
use serde_json::json;
use server_harness::HttpRequestSpec;
use server_harness::LaunchMatrix;
use server_harness::probe_batch;

use crate::helpers;

fn matrix_text() -> String {
    format!(
        r#"
[defaults]
program = "{program}"
health_path = "/health_generate"
startup_timeout_secs = 30

[defaults.env]
STUB_SUITE = "launch-matrix"

[[server]]
name = "tiny"
model = "stub/tiny-model"

[server.thresholds]
min_success_rate = 1.0
max_p99_ms = 2000.0

[[server]]
name = "tiny-auth"
model = "stub/tiny-model"
api_key = "sk-matrix"
args = ["--startup-delay-ms", 200]

[server.env]
STUB_SUITE = "launch-matrix-auth"
"#,
        program = stub_program().display()
    )
}

#[test]
fn matrix_entries_launch_and_meet_thresholds() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("matrix_entries_launch_and_meet_thresholds")?;
    let path = reporter.attach_text("matrix.toml", &matrix_text())?;
    let matrix = LaunchMatrix::load(&path)?;
    assert_eq!(matrix.names(), vec!["tiny", "tiny-auth"]);
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));

    let base_url = allocate_base_url()?;
    let spec = matrix.launch_spec("tiny", Some(&base_url))?;
    let requests: Vec<HttpRequestSpec> = (0..8)
        .map(|_| HttpRequestSpec::generate("The capital of France is", json!({"max_new_tokens": 4})))
        .collect();
    let mut handle = harness.launch(&spec)?;
    let batch = probe_batch(&handle, &requests, 2);
    let report = handle.terminate()?;
    assert!(wait_gone(handle.pid(), Duration::from_secs(5)));

    #[allow(clippy::cast_precision_loss, reason = "Request counts are small.")]
    let success_rate = batch.success_count() as f64 / requests.len() as f64;
    let min_success = matrix.threshold("tiny", "min_success_rate").ok_or("missing threshold")?;
    assert!(success_rate >= min_success, "success rate {success_rate} below {min_success}");
    let latency = batch.latency().ok_or("no latency samples")?;
    let max_p99 = matrix.threshold("tiny", "max_p99_ms").ok_or("missing threshold")?;
    #[allow(clippy::cast_precision_loss, reason = "Millisecond latencies are small.")]
    let p99_ms = latency.p99.as_millis() as f64;
    assert!(p99_ms <= max_p99, "p99 {p99_ms}ms above {max_p99}ms");

    reporter.attach_json("tiny_latency.json", &latency)?;
    reporter.note(format!("tiny success rate {success_rate}, exit {:?}", report.exit));
    reporter.pass()?;
    Ok(())
}

#[test]
fn matrix_entry_env_and_api_key_reach_the_server() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("matrix_entry_env_and_api_key_reach_the_server")?;
    let path = reporter.attach_text("matrix.toml", &matrix_text())?;
    let matrix = LaunchMatrix::load(&path)?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));

    let base_url = allocate_base_url()?;
    let spec = matrix.launch_spec("tiny-auth", Some(&base_url))?;
    assert!(!spec.command_line().contains("sk-matrix"));
    let info = harness.scoped(&spec, |handle| handle.probe(&HttpRequestSpec::server_info()))??;
    assert_eq!(info.status, 200);
    assert_eq!(
        info.pointer("/env/STUB_SUITE").and_then(Value::as_str),
        Some("launch-matrix-auth")
    );
    assert_eq!(info.pointer("/model_path"), Some(&json!("stub/tiny-model")));

    reporter.note("entry env overrides defaults");
    reporter.pass()?;
    Ok(())
}
