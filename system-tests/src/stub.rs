// system-tests/src/stub.rs
// ============================================================================
// Module: Stub Inference Server
// Description: Minimal HTTP collaborator used by the harness system tests.
// Purpose: Provide controllable readiness, shutdown, and generation behavior.
// Dependencies: axum, clap, serde, serde_json, tokio
// ============================================================================

//! ## Overview
//! The stub mirrors the HTTP surface of an inference server closely enough to
//! drive the harness end to end: health endpoints, server info, a model list,
//! and `/generate` with canned continuations for well-known prompts. Flags
//! select failure modes (slow start, never ready, ignoring SIGTERM, spawning a
//! grandchild, immediate exit).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of environment variables echoed by `/get_server_info`.
pub const ECHO_ENV_PREFIX: &str = "STUB_";

/// Continuations returned for well-known prompts.
const CANNED_CONTINUATIONS: &[(&str, &str)] = &[
    ("The capital of France is", " Paris. It is the largest city in France."),
    ("The capital of the United Kingdom is", " London."),
    ("Today is a sunny day and I like", " to go for a walk in the park."),
];

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Command-line arguments for the stub server.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "stub_inference_server", about = "Stub inference server for harness tests")]
pub struct StubArgs {
    /// Model identifier reported by the server.
    #[arg(long = "model-path", value_name = "MODEL")]
    pub model_path: Option<String>,
    /// Bind host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Bind port.
    #[arg(long)]
    pub port: u16,
    /// Require `Authorization: Bearer <key>` on every endpoint.
    #[arg(long)]
    pub api_key: Option<String>,
    /// Delay before the listener is bound.
    #[arg(long, default_value_t = 0)]
    pub startup_delay_ms: u64,
    /// Answer health endpoints with 503 forever.
    #[arg(long)]
    pub never_ready: bool,
    /// Keep serving after SIGTERM.
    #[arg(long)]
    pub ignore_sigterm: bool,
    /// Spawn a SIGTERM-ignoring grandchild in the same process group.
    #[arg(long)]
    pub spawn_child: bool,
    /// Exit immediately with this code instead of serving.
    #[arg(long)]
    pub exit_code: Option<u8>,
}

// ============================================================================
// SECTION: Server State
// ============================================================================

/// Immutable facts shared with every handler.
#[derive(Debug, Clone, Serialize)]
struct StubInfo {
    /// Model identifier.
    model_path: Option<String>,
    /// Bind host.
    host: String,
    /// Bind port.
    port: u16,
    /// Server process id.
    pid: u32,
    /// Grandchild process id, when spawned.
    child_pid: Option<u32>,
    /// Echoed `STUB_*` environment variables.
    env: BTreeMap<String, String>,
    /// Whether health endpoints succeed.
    #[serde(skip)]
    ready: bool,
    /// Expected authorization header value.
    #[serde(skip)]
    expected_auth: Option<String>,
}

/// Shared handler state.
type StubState = Arc<StubInfo>;

// ============================================================================
// SECTION: Generation
// ============================================================================

/// Sampling parameters accepted by `/generate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SamplingParams {
    /// Maximum number of generated words.
    #[serde(default)]
    pub max_new_tokens: Option<usize>,
    /// Accepted for compatibility; the stub is deterministic.
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Request body for `/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Prompt text.
    pub text: String,
    /// Sampling parameters.
    #[serde(default)]
    pub sampling_params: SamplingParams,
}

/// Deterministic completion for a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text, each word preceded by a space.
    pub text: String,
    /// Prompt length in words.
    pub prompt_tokens: usize,
    /// Generated length in words.
    pub completion_tokens: usize,
    /// `stop` when the continuation ended, `length` when truncated.
    pub finish_reason: &'static str,
}

/// Produces the canned continuation for known prompts, otherwise echoes the prompt.
#[must_use]
pub fn complete(prompt: &str, max_new_tokens: Option<usize>) -> Completion {
    let trimmed = prompt.trim_end();
    let continuation = CANNED_CONTINUATIONS
        .iter()
        .find(|(known, _)| *known == trimmed)
        .map_or(trimmed, |(_, continuation)| *continuation);
    let words: Vec<&str> = continuation.split_whitespace().collect();
    let limit = max_new_tokens.unwrap_or(words.len()).min(words.len());
    let text: String = words[..limit].iter().map(|word| format!(" {word}")).collect();
    Completion {
        text,
        prompt_tokens: trimmed.split_whitespace().count(),
        completion_tokens: limit,
        finish_reason: if limit < words.len() { "length" } else { "stop" },
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Binds the listener and serves until shutdown.
///
/// # Errors
///
/// Returns an error when the grandchild cannot be spawned or the listener
/// cannot be bound.
pub async fn serve(args: StubArgs) -> io::Result<()> {
    if args.startup_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.startup_delay_ms)).await;
    }
    let child_pid = if args.spawn_child { Some(spawn_grandchild()?) } else { None };
    let info = StubInfo {
        model_path: args.model_path.clone(),
        host: args.host.clone(),
        port: args.port,
        pid: std::process::id(),
        child_pid,
        env: std::env::vars().filter(|(key, _)| key.starts_with(ECHO_ENV_PREFIX)).collect(),
        ready: !args.never_ready,
        expected_auth: args.api_key.as_ref().map(|key| format!("Bearer {key}")),
    };
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    axum::serve(listener, router(Arc::new(info)))
        .with_graceful_shutdown(shutdown_signal(args.ignore_sigterm))
        .await
}

/// Builds the HTTP routes.
fn router(state: StubState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health_generate", get(health))
        .route("/get_server_info", get(server_info))
        .route("/v1/models", get(models))
        .route("/generate", post(generate))
        .with_state(state)
}

/// Spawns `sleep` with SIGTERM ignored so only a group SIGKILL removes it.
fn spawn_grandchild() -> io::Result<u32> {
    let child = Command::new("sh")
        .args(["-c", "trap '' TERM; exec sleep 300"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(child.id())
}

/// Resolves on SIGTERM unless SIGTERM is being ignored.
#[cfg(unix)]
async fn shutdown_signal(ignore_sigterm: bool) {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        std::future::pending::<()>().await;
        return;
    };
    loop {
        if terminate.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
        if !ignore_sigterm {
            return;
        }
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal(_ignore_sigterm: bool) {
    let _ = tokio::signal::ctrl_c().await;
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Returns true when the request carries the expected bearer token.
fn authorized(state: &StubInfo, headers: &HeaderMap) -> bool {
    state.expected_auth.as_deref().is_none_or(|expected| {
        headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) == Some(expected)
    })
}

async fn health(State(state): State<StubState>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    if state.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn server_info(State(state): State<StubState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.as_ref().clone()).into_response()
}

async fn models(State(state): State<StubState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let id = state.model_path.clone().unwrap_or_else(|| "stub".to_string());
    Json(json!({"object": "list", "data": [{"id": id, "object": "model"}]})).into_response()
}

async fn generate(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let completion = complete(&request.text, request.sampling_params.max_new_tokens);
    Json(json!({
        "text": completion.text,
        "meta_info": {
            "prompt_tokens": completion.prompt_tokens,
            "completion_tokens": completion.completion_tokens,
            "finish_reason": {"type": completion.finish_reason},
        },
    }))
    .into_response()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
