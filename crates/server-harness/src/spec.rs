// crates/server-harness/src/spec.rs
// ============================================================================
// Module: Launch Spec
// Description: Immutable description of how to start a collaborator server.
// Purpose: Validate launch inputs once and render the process argument vector.
// Dependencies: serde, url
// ============================================================================

//! ## Overview
//! [`LaunchSpec`] is built through [`LaunchSpecBuilder`], which validates the
//! base URL, health path, and durations before any process is spawned.
//! Invariants:
//! - The base URL is `http` or `https` with an explicit host and port.
//! - The health path starts with `/`.
//! - Startup timeout, poll interval, and grace period are non-zero.
//! - Environment overrides are merged over the inherited environment; the
//!   harness adds no variables of its own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use url::Host;
use url::Url;

use crate::error::HarnessError;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default startup budget for a collaborator server.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(600);
/// Default interval between health attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default wait between the cooperative and the unconditional kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// Default health path polled during launch.
pub const DEFAULT_HEALTH_PATH: &str = "/health_generate";
/// Flag used to pass the model identifier.
pub const MODEL_FLAG: &str = "--model-path";

// ============================================================================
// SECTION: Launch Arguments
// ============================================================================

/// A single command-line argument with its original scalar type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaunchArg {
    /// Boolean scalar rendered as `true`/`false`.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// Plain string argument.
    Str(String),
}

impl LaunchArg {
    /// Renders the argument as it appears on the command line.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LaunchArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for LaunchArg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for LaunchArg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for LaunchArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for LaunchArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for LaunchArg {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for LaunchArg {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for LaunchArg {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

// ============================================================================
// SECTION: Output Targets
// ============================================================================

/// Redirect target for a collaborator output stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    /// Share the harness process stream.
    Inherit,
    /// Drop the stream.
    Discard,
    /// Write to a caller-owned file that outlives the handle.
    File(PathBuf),
    /// Write to a harness-owned sink scoped to one launch/terminate cycle.
    #[default]
    Capture,
}

// ============================================================================
// SECTION: Launch Spec
// ============================================================================

/// Immutable description of a collaborator launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Label used for logs and capture file names.
    name: String,
    /// Executable to run.
    program: String,
    /// Arguments placed before the model flag (for example `-m module`).
    program_args: Vec<LaunchArg>,
    /// Optional model identifier.
    model: Option<String>,
    /// Ordered server arguments.
    args: Vec<LaunchArg>,
    /// Environment overrides merged over the inherited environment.
    env: BTreeMap<String, String>,
    /// Inherited variables removed before launch.
    env_remove: Vec<String>,
    /// Base URL the server is expected to serve on.
    base_url: Url,
    /// Health path polled during launch.
    health_path: String,
    /// Optional bearer token for health checks and probes.
    api_key: Option<String>,
    /// Startup budget.
    startup_timeout: Duration,
    /// Interval between health attempts.
    poll_interval: Duration,
    /// Wait between SIGTERM and SIGKILL.
    grace_period: Duration,
    /// Optional working directory.
    working_dir: Option<PathBuf>,
    /// Stdout redirect.
    stdout: OutputTarget,
    /// Stderr redirect.
    stderr: OutputTarget,
    /// Whether `--host`/`--port`/`--api-key` are appended.
    inject_bind_args: bool,
}

impl LaunchSpec {
    /// Starts a builder for the given program and base URL.
    #[must_use]
    pub fn builder(program: impl Into<String>, base_url: impl Into<String>) -> LaunchSpecBuilder {
        LaunchSpecBuilder::new(program, base_url)
    }

    /// Returns the spec label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the executable.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the model identifier, when set.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Returns the ordered server arguments.
    #[must_use]
    pub fn args(&self) -> &[LaunchArg] {
        &self.args
    }

    /// Returns the environment overrides.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Returns inherited variables removed before launch.
    #[must_use]
    pub fn env_remove(&self) -> &[String] {
        &self.env_remove
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }

    /// Returns the health path.
    #[must_use]
    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    /// Returns the full health URL.
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), self.health_path)
    }

    /// Returns the API key, when set.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Returns the startup budget.
    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Returns the health poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the termination grace period.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns the working directory, when set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Returns the stdout redirect.
    #[must_use]
    pub const fn stdout(&self) -> &OutputTarget {
        &self.stdout
    }

    /// Returns the stderr redirect.
    #[must_use]
    pub const fn stderr(&self) -> &OutputTarget {
        &self.stderr
    }

    /// Returns the host portion of the base URL, without IPv6 brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.host() {
            Some(Host::Ipv6(_)) => {
                host.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')).unwrap_or(host)
            }
            _ => host,
        }
    }

    /// Returns the port portion of the base URL.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.base_url.port_or_known_default().unwrap_or_default()
    }

    /// Renders the argument vector passed to the program (excluding the program itself).
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv: Vec<String> = self.program_args.iter().map(LaunchArg::render).collect();
        if let Some(model) = &self.model {
            argv.push(MODEL_FLAG.to_string());
            argv.push(model.clone());
        }
        if self.inject_bind_args {
            argv.push("--host".to_string());
            argv.push(self.host().to_string());
            argv.push("--port".to_string());
            argv.push(self.port().to_string());
        }
        argv.extend(self.args.iter().map(LaunchArg::render));
        if self.inject_bind_args
            && let Some(api_key) = &self.api_key
        {
            argv.push("--api-key".to_string());
            argv.push(api_key.clone());
        }
        argv
    }

    /// Renders the full command line for diagnostics, with the API key masked.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        let mut mask_next = false;
        for arg in self.argv() {
            if mask_next {
                parts.push("***".to_string());
                mask_next = false;
                continue;
            }
            mask_next = arg == "--api-key";
            parts.push(arg);
        }
        parts.join(" ")
    }

    /// Returns a copy of this spec with a different startup timeout.
    #[must_use]
    pub fn with_startup_timeout(&self, startup_timeout: Duration) -> Self {
        let mut spec = self.clone();
        if !startup_timeout.is_zero() {
            spec.startup_timeout = startup_timeout;
        }
        spec
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for [`LaunchSpec`].
#[derive(Debug, Clone)]
pub struct LaunchSpecBuilder {
    /// Label used for logs and capture file names.
    name: Option<String>,
    /// Executable to run.
    program: String,
    /// Arguments placed before the model flag.
    program_args: Vec<LaunchArg>,
    /// Optional model identifier.
    model: Option<String>,
    /// Ordered server arguments.
    args: Vec<LaunchArg>,
    /// Environment overrides.
    env: BTreeMap<String, String>,
    /// Inherited variables removed before launch.
    env_remove: Vec<String>,
    /// Raw base URL, parsed in `build`.
    base_url: String,
    /// Health path.
    health_path: String,
    /// Optional bearer token.
    api_key: Option<String>,
    /// Startup budget.
    startup_timeout: Duration,
    /// Interval between health attempts.
    poll_interval: Duration,
    /// Wait between SIGTERM and SIGKILL.
    grace_period: Duration,
    /// Optional working directory.
    working_dir: Option<PathBuf>,
    /// Stdout redirect.
    stdout: OutputTarget,
    /// Stderr redirect.
    stderr: OutputTarget,
    /// Whether bind arguments are appended.
    inject_bind_args: bool,
}

impl LaunchSpecBuilder {
    /// Creates a builder with harness defaults.
    #[must_use]
    pub fn new(program: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: None,
            program: program.into(),
            program_args: Vec::new(),
            model: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            base_url: base_url.into(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            api_key: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            working_dir: None,
            stdout: OutputTarget::Capture,
            stderr: OutputTarget::Capture,
            inject_bind_args: true,
        }
    }

    /// Sets the spec label.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends an argument placed before the model flag.
    #[must_use]
    pub fn program_arg(mut self, arg: impl Into<LaunchArg>) -> Self {
        self.program_args.push(arg.into());
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Appends one server argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<LaunchArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several server arguments in order.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<LaunchArg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds several environment overrides; later keys win.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Removes an inherited variable from the collaborator environment.
    #[must_use]
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Sets the health path.
    #[must_use]
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Sets the API key used for `--api-key` and bearer auth.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the startup budget.
    #[must_use]
    pub const fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the health poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the termination grace period.
    #[must_use]
    pub const fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the stdout redirect.
    #[must_use]
    pub fn stdout(mut self, target: OutputTarget) -> Self {
        self.stdout = target;
        self
    }

    /// Sets the stderr redirect.
    #[must_use]
    pub fn stderr(mut self, target: OutputTarget) -> Self {
        self.stderr = target;
        self
    }

    /// Controls whether `--host`, `--port`, and `--api-key` are appended.
    #[must_use]
    pub const fn inject_bind_args(mut self, inject: bool) -> Self {
        self.inject_bind_args = inject;
        self
    }

    /// Validates inputs and produces the immutable spec.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidSpec`] when the program is empty, the
    /// base URL is not an `http(s)` URL with host and port, the health path
    /// does not start with `/`, or a duration is zero.
    pub fn build(self) -> Result<LaunchSpec, HarnessError> {
        if self.program.trim().is_empty() {
            return Err(HarnessError::InvalidSpec("program must not be empty".to_string()));
        }
        let base_url = parse_base_url(&self.base_url)?;
        if !self.health_path.starts_with('/') {
            return Err(HarnessError::InvalidSpec(format!(
                "health path must start with '/': {}",
                self.health_path
            )));
        }
        for (label, value) in [
            ("startup timeout", self.startup_timeout),
            ("poll interval", self.poll_interval),
            ("grace period", self.grace_period),
        ] {
            if value.is_zero() {
                return Err(HarnessError::InvalidSpec(format!("{label} must be non-zero")));
            }
        }
        if let Some(key) = self.env.keys().find(|key| key.is_empty() || key.contains('=')) {
            return Err(HarnessError::InvalidSpec(format!("invalid environment key: {key:?}")));
        }
        let name = self.name.unwrap_or_else(|| default_name(&self.program, self.model.as_deref()));
        Ok(LaunchSpec {
            name,
            program: self.program,
            program_args: self.program_args,
            model: self.model,
            args: self.args,
            env: self.env,
            env_remove: self.env_remove,
            base_url,
            health_path: self.health_path,
            api_key: self.api_key,
            startup_timeout: self.startup_timeout,
            poll_interval: self.poll_interval,
            grace_period: self.grace_period,
            working_dir: self.working_dir,
            stdout: self.stdout,
            stderr: self.stderr,
            inject_bind_args: self.inject_bind_args,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses and validates a collaborator base URL.
fn parse_base_url(raw: &str) -> Result<Url, HarnessError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| HarnessError::InvalidSpec(format!("invalid base url {raw}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HarnessError::InvalidSpec(format!("base url must be http(s): {raw}")));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(HarnessError::InvalidSpec(format!("base url missing host: {raw}")));
    }
    if url.port().is_none() {
        return Err(HarnessError::InvalidSpec(format!("base url must carry an explicit non-default port: {raw}")));
    }
    if url.path() != "/" || url.query().is_some() {
        return Err(HarnessError::InvalidSpec(format!(
            "base url must not carry a path or query: {raw}"
        )));
    }
    Ok(url)
}

/// Derives a spec label from the model or program name.
fn default_name(program: &str, model: Option<&str>) -> String {
    let source = model.unwrap_or(program);
    let tail = source.rsplit(['/', '\\']).next().unwrap_or(source);
    let label: String = tail
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '-' })
        .collect();
    if label.is_empty() { "server".to_string() } else { label }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
