// crates/server-harness/src/config/env.rs
// ============================================================================
// Module: Harness Environment
// Description: Environment-backed configuration for the harness.
// Purpose: Centralize env parsing with strict UTF-8 validation.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values are parsed with strict UTF-8 enforcement to avoid silent
//! misconfiguration. Invalid or empty values fail closed. These variables
//! configure the harness itself and are never injected into collaborators.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarnessError;

// ============================================================================
// SECTION: Environment Constants
// ============================================================================

/// Default attempts for retried launches.
const DEFAULT_LAUNCH_ATTEMPTS: u32 = 1;

/// Environment keys for harness configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessEnv {
    /// Optional directory for persisted capture files.
    RunRoot,
    /// Optional startup timeout floor in seconds (positive integer).
    TimeoutSeconds,
    /// Keep capture files after terminate (`true`/`false` or `1`/`0`).
    KeepCaptures,
    /// Default attempts for retried launches (positive integer).
    LaunchAttempts,
    /// Tracing filter directive.
    Log,
}

impl HarnessEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunRoot => "SERVER_HARNESS_RUN_ROOT",
            Self::TimeoutSeconds => "SERVER_HARNESS_TIMEOUT_SEC",
            Self::KeepCaptures => "SERVER_HARNESS_KEEP_CAPTURES",
            Self::LaunchAttempts => "SERVER_HARNESS_LAUNCH_ATTEMPTS",
            Self::Log => "SERVER_HARNESS_LOG",
        }
    }
}

// ============================================================================
// SECTION: Config Types
// ============================================================================

/// Typed harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Optional directory for persisted capture files.
    pub run_root: Option<PathBuf>,
    /// Optional startup timeout floor.
    pub timeout_floor: Option<Duration>,
    /// Keep capture files after terminate.
    pub keep_captures: bool,
    /// Default attempts for retried launches.
    pub launch_attempts: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            run_root: None,
            timeout_floor: None,
            keep_captures: false,
            launch_attempts: DEFAULT_LAUNCH_ATTEMPTS,
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] when an environment value is not valid
    /// UTF-8, is empty, or fails validation.
    pub fn load() -> Result<Self, HarnessError> {
        let run_root = read_env_nonempty(HarnessEnv::RunRoot.as_str())?.map(PathBuf::from);
        let timeout_floor = read_env_nonempty(HarnessEnv::TimeoutSeconds.as_str())?
            .map(|value| parse_positive(HarnessEnv::TimeoutSeconds.as_str(), &value))
            .transpose()?
            .map(Duration::from_secs);
        let keep_captures = parse_bool_env(
            HarnessEnv::KeepCaptures.as_str(),
            read_env_nonempty(HarnessEnv::KeepCaptures.as_str())?,
        )?;
        let launch_attempts = read_env_nonempty(HarnessEnv::LaunchAttempts.as_str())?
            .map(|value| parse_positive(HarnessEnv::LaunchAttempts.as_str(), &value))
            .transpose()?
            .map_or(Ok(DEFAULT_LAUNCH_ATTEMPTS), |value| {
                u32::try_from(value).map_err(|_| {
                    HarnessError::Config(format!(
                        "{} is too large",
                        HarnessEnv::LaunchAttempts.as_str()
                    ))
                })
            })?;
        Ok(Self {
            run_root,
            timeout_floor,
            keep_captures,
            launch_attempts,
        })
    }

    /// Returns the effective startup timeout; the floor never shortens a longer request.
    #[must_use]
    pub fn resolve_timeout(&self, requested: Duration) -> Duration {
        self.timeout_floor.map_or(requested, |floor| requested.max(floor))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads an environment variable and enforces UTF-8 validity.
///
/// # Errors
///
/// Returns an error when the environment variable contains invalid UTF-8.
pub fn read_env_strict(name: &str) -> Result<Option<String>, HarnessError> {
    std::env::var_os(name).map_or(Ok(None), |raw| {
        raw.into_string()
            .map(Some)
            .map_err(|_| HarnessError::Config(format!("{name} must be valid UTF-8")))
    })
}

/// Reads an environment variable and rejects empty values.
///
/// # Errors
///
/// Returns [`HarnessError::Config`] for invalid UTF-8 or blank values.
pub fn read_env_nonempty(name: &str) -> Result<Option<String>, HarnessError> {
    match read_env_strict(name)? {
        Some(value) if value.trim().is_empty() => {
            Err(HarnessError::Config(format!("{name} must not be empty")))
        }
        Some(value) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Parses a positive integer from an environment variable string.
fn parse_positive(name: &str, raw: &str) -> Result<u64, HarnessError> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| HarnessError::Config(format!("{name} must be a positive integer")))?;
    if value == 0 {
        return Err(HarnessError::Config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

/// Parses a boolean environment variable; unset means false.
///
/// # Errors
///
/// Returns [`HarnessError::Config`] for values other than `1`, `0`, `true`, or `false`.
pub fn parse_bool_env(name: &str, raw: Option<String>) -> Result<bool, HarnessError> {
    let Some(value) = raw else {
        return Ok(false);
    };
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        return Ok(false);
    }
    Err(HarnessError::Config(format!("{name} must be 1, 0, true, or false")))
}
