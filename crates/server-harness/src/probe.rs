// crates/server-harness/src/probe.rs
// ============================================================================
// Module: Probes
// Description: Single HTTP verification requests against a ready server.
// Purpose: Send method + path + JSON and return status, body, and latency.
// Dependencies: reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! A probe is one request with no hidden retries; retry and threshold policy
//! belong to the calling test. Transport failures are errors, HTTP error
//! statuses are results. [`probe_batch`] issues many probes concurrently from
//! scoped threads and summarizes latency.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;

use crate::error::HarnessError;
use crate::handle::ServerHandle;

// ============================================================================
// SECTION: Well-Known Paths
// ============================================================================

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/health";
/// Server-info endpoint.
pub const SERVER_INFO_PATH: &str = "/get_server_info";
/// Native generation endpoint.
pub const GENERATE_PATH: &str = "/generate";

// ============================================================================
// SECTION: Request Spec
// ============================================================================

/// Description of one HTTP probe.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    /// HTTP method.
    method: Method,
    /// Path relative to the base URL, starting with `/`.
    path: String,
    /// Optional JSON body.
    body: Option<Value>,
    /// Extra request headers.
    headers: Vec<(String, String)>,
    /// Optional per-request timeout overriding the client default.
    timeout: Option<Duration>,
}

impl HttpRequestSpec {
    /// Creates a request with an arbitrary method.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{path}") };
        Self {
            method,
            path,
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request with a JSON body.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).body(body)
    }

    /// GET `/health`.
    #[must_use]
    pub fn health() -> Self {
        Self::get(HEALTH_PATH)
    }

    /// GET `/get_server_info`.
    #[must_use]
    pub fn server_info() -> Self {
        Self::get(SERVER_INFO_PATH)
    }

    /// POST `/generate` with a prompt and sampling parameters.
    #[must_use]
    pub fn generate(text: &str, sampling_params: Value) -> Self {
        Self::post_json(
            GENERATE_PATH,
            json!({
                "text": text,
                "sampling_params": sampling_params,
            }),
        )
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true when a header with this name was set explicitly.
    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// SECTION: Probe Result
// ============================================================================

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// HTTP status code.
    pub status: u16,
    /// Response content type, when present.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: String,
    /// Parsed JSON body, when the body is valid JSON.
    pub json: Option<Value>,
    /// Round-trip latency including body read.
    pub latency: Duration,
}

impl ProbeResult {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the parsed JSON body.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Looks up a JSON pointer (RFC 6901) in the parsed body.
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.json.as_ref().and_then(|value| value.pointer(pointer))
    }

    /// Deserializes the body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Decode`] when the body is not valid JSON for `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, HarnessError> {
        serde_json::from_str(&self.body).map_err(|err| HarnessError::Decode(err.to_string()))
    }
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Sends one request and reads the full response. Never retries.
pub(crate) fn send_probe(
    client: &Client,
    base_url: &str,
    api_key: Option<&str>,
    request: &HttpRequestSpec,
) -> Result<ProbeResult, HarnessError> {
    let url = format!("{base_url}{}", request.path);
    let transport_error = |message: String| HarnessError::ProbeTransport {
        method: request.method.to_string(),
        url: url.clone(),
        message,
    };
    let mut builder = client.request(request.method.clone(), &url);
    if let Some(api_key) = api_key
        && !request.has_header(AUTHORIZATION.as_str())
    {
        builder = builder.bearer_auth(api_key);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    let started = Instant::now();
    let response = builder.send().map_err(|err| transport_error(error_chain(&err)))?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().map_err(|err| transport_error(error_chain(&err)))?;
    let latency = started.elapsed();
    let json = serde_json::from_str(&body).ok();
    Ok(ProbeResult {
        status,
        content_type,
        body,
        json,
        latency,
    })
}

/// Flattens an error and its sources into one message.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

// ============================================================================
// SECTION: Batches
// ============================================================================

/// Latency distribution over successful probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    /// Number of samples.
    pub count: usize,
    /// Fastest sample.
    pub min: Duration,
    /// Slowest sample.
    pub max: Duration,
    /// Arithmetic mean.
    pub mean: Duration,
    /// Median (nearest rank).
    pub p50: Duration,
    /// 90th percentile (nearest rank).
    pub p90: Duration,
    /// 99th percentile (nearest rank).
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarizes latency samples; returns `None` for an empty set.
    #[must_use]
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        let count = sorted.len();
        let divisor = u32::try_from(count).unwrap_or(u32::MAX);
        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: total / divisor,
            p50: nearest_rank(&sorted, 50),
            p90: nearest_rank(&sorted, 90),
            p99: nearest_rank(&sorted, 99),
        })
    }
}

/// Nearest-rank percentile over a sorted, non-empty slice.
fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// Results of a concurrent probe batch.
#[derive(Debug)]
pub struct BatchReport {
    /// Per-request outcomes in request order.
    pub results: Vec<Result<ProbeResult, HarnessError>>,
    /// Wall-clock time for the whole batch.
    pub wall: Duration,
}

impl BatchReport {
    /// Returns the number of probes that produced a 2xx response.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|result| result.as_ref().is_ok_and(ProbeResult::is_success)).count()
    }

    /// Returns completed requests per second over the wall time.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.wall.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        let completed = self.results.iter().filter(|result| result.is_ok()).count();
        f64::from(u32::try_from(completed).unwrap_or(u32::MAX)) / secs
    }

    /// Summarizes latency over responses that arrived.
    #[must_use]
    pub fn latency(&self) -> Option<LatencySummary> {
        let samples: Vec<Duration> =
            self.results.iter().filter_map(|result| result.as_ref().ok()).map(|r| r.latency).collect();
        LatencySummary::from_samples(&samples)
    }
}

/// Issues `requests` against one READY handle from up to `parallelism` threads.
///
/// Each request is sent exactly once; failures are reported per request.
#[must_use]
pub fn probe_batch(
    handle: &ServerHandle,
    requests: &[HttpRequestSpec],
    parallelism: usize,
) -> BatchReport {
    let workers = parallelism.clamp(1, requests.len().max(1));
    let next = Mutex::new(0usize);
    let slots: Vec<Mutex<Option<Result<ProbeResult, HarnessError>>>> =
        requests.iter().map(|_| Mutex::new(None)).collect();
    let started = Instant::now();
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = {
                        let Ok(mut guard) = next.lock() else {
                            return;
                        };
                        let index = *guard;
                        *guard += 1;
                        index
                    };
                    let Some(request) = requests.get(index) else {
                        return;
                    };
                    let outcome = handle.probe(request);
                    if let Ok(mut slot) = slots[index].lock() {
                        *slot = Some(outcome);
                    }
                }
            });
        }
    });
    let wall = started.elapsed();
    let results = slots
        .into_iter()
        .map(|slot| {
            slot.into_inner().ok().flatten().unwrap_or_else(|| {
                Err(HarnessError::ProbeTransport {
                    method: "?".to_string(),
                    url: handle.base_url().to_string(),
                    message: "probe worker did not complete".to_string(),
                })
            })
        })
        .collect();
    BatchReport {
        results,
        wall,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
