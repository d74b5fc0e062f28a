// crates/server-harness/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared helpers for server-harness integration tests.
// Purpose: Provide an in-process health endpoint and shell collaborators.
// Dependencies: server-harness, tiny_http
// ============================================================================

//! ## Overview
//! The collaborator under test is a plain shell process, while its HTTP surface
//! is served in-process by `tiny_http`. This separates process lifecycle from
//! readiness so each can be driven independently.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    dead_code,
    reason = "Test-only helpers; not every suite uses every helper."
)]

use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use server_harness::LaunchSpec;
use server_harness::LaunchSpecBuilder;
use server_harness::is_alive;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Health Server
// ============================================================================

/// In-process HTTP endpoint standing in for a collaborator's API.
pub struct HealthServer {
    server: Arc<Server>,
    worker: Option<JoinHandle<()>>,
    base_url: String,
}

impl HealthServer {
    /// Starts an endpoint with no authentication.
    pub fn start() -> Self {
        Self::start_with_key(None)
    }

    /// Starts an endpoint that requires `Authorization: Bearer <key>` when set.
    pub fn start_with_key(api_key: Option<&str>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("http server"));
        let port = server.server_addr().to_ip().expect("ip listener").port();
        let expected = api_key.map(|key| format!("Bearer {key}"));
        let worker_server = Arc::clone(&server);
        let worker = thread::spawn(move || {
            while let Ok(request) = worker_server.recv() {
                respond(request, expected.as_deref());
            }
        });
        Self {
            server,
            worker: Some(worker),
            base_url: format!("http://127.0.0.1:{port}"),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn respond(mut request: tiny_http::Request, expected_auth: Option<&str>) {
    if let Some(expected) = expected_auth {
        let authorized = request
            .headers()
            .iter()
            .any(|header| header.field.equiv("Authorization") && header.value.as_str() == expected);
        if !authorized {
            let _ = request.respond(Response::from_string("unauthorized").with_status_code(401));
            return;
        }
    }
    let path = request.url().split('?').next().unwrap_or_default().to_string();
    let mut body = String::new();
    let _ = request.as_reader().read_to_string(&mut body);
    let json = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
    let response = match path.as_str() {
        "/health" | "/health_generate" => Response::from_string("ok"),
        "/get_server_info" => {
            Response::from_string(r#"{"model_path":"test-model","version":"0.0.0"}"#)
                .with_header(json)
        }
        "/echo" => Response::from_string(body).with_header(json),
        _ => Response::from_string("not found").with_status_code(404),
    };
    let _ = request.respond(response);
}

// ============================================================================
// SECTION: Collaborators
// ============================================================================

/// Returns a base URL whose port has no listener.
pub fn unused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Shell collaborator running `script`, with fast polling and no bind args.
pub fn shell(base_url: &str, script: &str) -> LaunchSpecBuilder {
    LaunchSpec::builder("sh", base_url)
        .args(["-c", script])
        .inject_bind_args(false)
        .health_path("/health")
        .poll_interval(Duration::from_millis(50))
        .grace_period(Duration::from_secs(2))
        .startup_timeout(Duration::from_secs(10))
}

/// Long-running collaborator that exits on SIGTERM.
pub fn sleeper(base_url: &str) -> LaunchSpecBuilder {
    shell(base_url, "exec sleep 30")
}

/// Waits until `pid` is gone, returning false on timeout.
pub fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    !is_alive(pid)
}

/// Polls `read` until it yields a value or the timeout elapses.
pub fn wait_for<T>(timeout: Duration, mut read: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = read() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
