// system-tests/tests/suites/endpoints.rs
// ============================================================================
// Module: Endpoint Tests
// Description: HTTP probes against a READY stub inference server.
// Purpose: Validate GET/POST probes, bearer auth, and batched probing.
// Dependencies: system-tests helpers, server-harness, serde_json
// ============================================================================

//! ## Overview
//! Exercises the probe surface against a live stub: health, server info,
//! `/generate` with canned continuations, API-key enforcement, and a batch of
//! concurrent generate requests.

use helpers::artifacts::TestReporter;
use helpers::harness::STUB_MODEL;
use helpers::harness::recording_harness;
use helpers::harness::stub_spec;
use serde_json::Value;
use serde_json::json;
use server_harness::HttpRequestSpec;
use server_harness::probe_batch;

use crate::helpers;

#[test]
fn health_and_generate_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("health_and_generate_round_trip")?;
    let (harness, observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("endpoints-generate").build()?;

    let mut handle = harness.launch(&spec)?;
    let health = handle.probe(&HttpRequestSpec::get("/health"))?;
    assert_eq!(health.status, 200);

    let generated = handle.probe(&HttpRequestSpec::generate(
        "The capital of France is",
        json!({"temperature": 0, "max_new_tokens": 32}),
    ))?;
    assert!(generated.is_success());
    let text = generated.pointer("/text").and_then(Value::as_str).ok_or("missing text")?;
    assert!(text.contains(" Paris"), "unexpected continuation: {text}");
    assert_eq!(generated.pointer("/meta_info/finish_reason/type"), Some(&json!("stop")));
    handle.terminate()?;

    assert!(observer.kinds().contains(&"probed"));
    reporter.attach_json("generate.json", &generated.json())?;
    reporter.note(format!("continuation: {text}"));
    reporter.pass()?;
    Ok(())
}

#[test]
fn server_info_reflects_model_and_environment() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("server_info_reflects_model_and_environment")?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?
        .name("endpoints-info")
        .env("STUB_DEPLOYMENT", "system-test")
        .env("STUB_SHARD", "3")
        .build()?;

    let output = harness.scoped(&spec, |handle| handle.probe(&HttpRequestSpec::server_info()))?;
    let info = output?;
    assert_eq!(info.pointer("/model_path"), Some(&json!(STUB_MODEL)));
    assert_eq!(info.pointer("/port").and_then(Value::as_u64), Some(u64::from(spec.port())));
    assert_eq!(info.pointer("/env/STUB_DEPLOYMENT"), Some(&json!("system-test")));
    assert_eq!(info.pointer("/env/STUB_SHARD"), Some(&json!("3")));

    reporter.note("server info echoed model and env");
    reporter.pass()?;
    Ok(())
}

#[test]
fn api_key_is_forwarded_and_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("api_key_is_forwarded_and_enforced")?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("endpoints-auth").api_key("sk-system-test").build()?;
    assert!(!spec.command_line().contains("sk-system-test"));

    let mut handle = harness.launch(&spec)?;
    let authorized = handle.probe(&HttpRequestSpec::server_info())?;
    assert_eq!(authorized.status, 200);
    let rejected = handle.probe(
        &HttpRequestSpec::server_info().header("Authorization", "Bearer not-the-key"),
    )?;
    assert_eq!(rejected.status, 401);
    handle.terminate()?;

    reporter.note("bearer token enforced");
    reporter.pass()?;
    Ok(())
}

#[test]
fn batched_generate_reports_latency() -> Result<(), Box<dyn std::error::Error>> {
    let mut reporter = TestReporter::new("batched_generate_reports_latency")?;
    let (harness, _observer) = recording_harness(Some(reporter.captures_dir()));
    let spec = stub_spec()?.name("endpoints-batch").build()?;

    let prompts = [
        "The capital of France is",
        "The capital of the United Kingdom is",
        "Today is a sunny day and I like",
    ];
    let requests: Vec<HttpRequestSpec> = prompts
        .iter()
        .cycle()
        .take(12)
        .map(|prompt| HttpRequestSpec::generate(prompt, json!({"max_new_tokens": 8})))
        .collect();

    let mut handle = harness.launch(&spec)?;
    let batch = probe_batch(&handle, &requests, 4);
    handle.terminate()?;

    assert_eq!(batch.results.len(), requests.len());
    assert_eq!(batch.success_count(), requests.len());
    let latency = batch.latency().ok_or("no latency samples")?;
    assert_eq!(latency.count, requests.len());
    assert!(latency.min <= latency.p50 && latency.p50 <= latency.max);
    assert!(batch.throughput() > 0.0);

    reporter.attach_json("latency.json", &latency)?;
    reporter.note(format!("{} requests in {:?}", requests.len(), batch.wall));
    reporter.pass()?;
    Ok(())
}
