// crates/server-harness-cli/src/main.rs
// ============================================================================
// Module: Server Harness CLI Entry Point
// Description: Operator commands for launch matrices and smoke checks.
// Purpose: List matrix entries and run launch/probe/terminate checks by hand.
// Dependencies: clap, serde, serde_json, server-harness, thiserror
// ============================================================================

//! ## Overview
//! `server-harness list` renders every matrix entry as one JSON line.
//! `server-harness check` launches one entry, probes its health path plus any
//! extra GET paths, terminates it, and prints a JSON report. The exit code is
//! non-zero when the launch or any probe fails.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use server_harness::Harness;
use server_harness::HarnessError;
use server_harness::HttpRequestSpec;
use server_harness::LaunchMatrix;
use server_harness::ServerHandle;
use server_harness::TerminationReport;
use server_harness::init_tracing;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Base URL used to render argv when neither the flag nor the matrix sets one.
const LIST_PLACEHOLDER_BASE_URL: &str = "http://127.0.0.1:30000";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Server harness command line.
#[derive(Parser, Debug)]
#[command(name = "server-harness", version, about = "Launch and check HTTP collaborator servers")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one JSON line per matrix entry.
    List(ListCommand),
    /// Launch an entry, probe it, and tear it down.
    Check(CheckCommand),
}

/// Arguments for `list`.
#[derive(Args, Debug)]
struct ListCommand {
    /// Path to the launch matrix TOML file.
    #[arg(long, value_name = "PATH")]
    matrix: PathBuf,
    /// Base URL used when rendering argv.
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,
}

/// Arguments for `check`.
#[derive(Args, Debug)]
struct CheckCommand {
    /// Path to the launch matrix TOML file.
    #[arg(long, value_name = "PATH")]
    matrix: PathBuf,
    /// Matrix entry to launch.
    #[arg(long, value_name = "NAME")]
    entry: String,
    /// Base URL the server should bind.
    #[arg(long, value_name = "URL")]
    base_url: String,
    /// Extra GET paths to probe after readiness.
    #[arg(long = "probe", value_name = "PATH")]
    probes: Vec<String>,
    /// Startup timeout override in seconds.
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// One `list` output line.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct ListLine {
    /// Entry name.
    name: String,
    /// Model identifier, when set.
    model: Option<String>,
    /// Executable.
    program: String,
    /// Rendered arguments.
    argv: Vec<String>,
}

/// Outcome of one probe in `check`.
#[derive(Debug, Serialize)]
struct ProbeLine {
    /// Request path.
    path: String,
    /// HTTP status when a response arrived.
    status: Option<u16>,
    /// Round-trip latency in milliseconds.
    latency_ms: Option<u64>,
    /// Transport error, when no response arrived.
    error: Option<String>,
}

impl ProbeLine {
    /// Returns true for 2xx responses.
    fn passed(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

/// Report printed by `check`.
#[derive(Debug, Serialize)]
struct CheckReport {
    /// Entry name.
    entry: String,
    /// Process id, when spawned and ready.
    pid: Option<u32>,
    /// Whether the server reached READY.
    ready: bool,
    /// Launch error, when the server never became ready.
    launch_error: Option<String>,
    /// Probe outcomes in request order.
    probes: Vec<ProbeLine>,
    /// Teardown report, when the server was ready and teardown succeeded.
    termination: Option<TerminationReport>,
    /// Teardown failure, when signalling or reaping the server failed.
    teardown_error: Option<String>,
    /// Overall verdict.
    passed: bool,
}

impl CheckReport {
    /// Computes the overall verdict.
    fn finish(mut self) -> Self {
        self.passed = self.ready
            && self.teardown_error.is_none()
            && self.probes.iter().all(ProbeLine::passed);
        self
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        Self::new(err.to_string())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Commands::List(command) => command_list(&command),
        Commands::Check(command) => command_check(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `list`.
fn command_list(command: &ListCommand) -> CliResult<ExitCode> {
    let matrix = LaunchMatrix::load(&command.matrix)?;
    for line in list_lines(&matrix, command.base_url.as_deref())? {
        let json = serde_json::to_string(&line)
            .map_err(|err| CliError::new(format!("failed to encode entry: {err}")))?;
        write_stdout_line(&json).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `check`.
fn command_check(command: &CheckCommand) -> CliResult<ExitCode> {
    let matrix = LaunchMatrix::load(&command.matrix)?;
    let mut spec = matrix.launch_spec(&command.entry, Some(&command.base_url))?;
    if let Some(secs) = command.timeout_secs {
        spec = spec.with_startup_timeout(Duration::from_secs(secs));
    }
    let harness = Harness::from_env()?;
    let mut paths = vec![spec.health_path().to_string()];
    paths.extend(command.probes.iter().cloned());
    let report = match harness.launch(&spec) {
        Ok(mut handle) => {
            let probes = paths.iter().map(|path| probe_line(&handle, path)).collect();
            let (termination, teardown_error) = match handle.terminate() {
                Ok(report) => (Some(report), None),
                Err(err) => (None, Some(err.to_string())),
            };
            CheckReport {
                entry: command.entry.clone(),
                pid: Some(handle.pid()),
                ready: true,
                launch_error: None,
                probes,
                termination,
                teardown_error,
                passed: false,
            }
        }
        Err(err) => CheckReport {
            entry: command.entry.clone(),
            pid: None,
            ready: false,
            launch_error: Some(err.to_string()),
            probes: Vec::new(),
            termination: None,
            teardown_error: None,
            passed: false,
        },
    }
    .finish();
    let json = serde_json::to_string_pretty(&report)
        .map_err(|err| CliError::new(format!("failed to encode report: {err}")))?;
    write_stdout_line(&json).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(if report.passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Renders every matrix entry for `list`.
fn list_lines(matrix: &LaunchMatrix, base_url: Option<&str>) -> CliResult<Vec<ListLine>> {
    let base_url = base_url
        .or(matrix.defaults().base_url.as_deref())
        .unwrap_or(LIST_PLACEHOLDER_BASE_URL);
    matrix
        .entries()
        .iter()
        .map(|entry| -> CliResult<ListLine> {
            let spec = matrix.launch_spec(&entry.name, Some(base_url))?;
            Ok(ListLine {
                name: entry.name.clone(),
                model: entry.model.clone(),
                program: spec.program().to_string(),
                argv: spec.argv(),
            })
        })
        .collect()
}

/// Probes one GET path and records the outcome.
fn probe_line(handle: &ServerHandle, path: &str) -> ProbeLine {
    match handle.probe(&HttpRequestSpec::get(path)) {
        Ok(result) => ProbeLine {
            path: path.to_string(),
            status: Some(result.status),
            latency_ms: Some(u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX)),
            error: None,
        },
        Err(err) => ProbeLine {
            path: path.to_string(),
            status: None,
            latency_ms: None,
            error: Some(err.to_string()),
        },
    }
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
