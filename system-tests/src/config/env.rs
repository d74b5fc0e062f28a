// system-tests/src/config/env.rs
// ============================================================================
// Module: System Test Environment
// Description: Settings for the stub-backed system tests.
// Purpose: Locate artifacts and the collaborator binary for each suite run.
// Dependencies: server-harness
// ============================================================================

//! ## Overview
//! Values are read through the harness crate's strict parsers, so blank or
//! non-UTF-8 settings fail the run instead of being ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use server_harness::HarnessError;
use server_harness::config::parse_bool_env;
use server_harness::config::read_env_nonempty;

// ============================================================================
// SECTION: Environment Keys
// ============================================================================

/// Environment keys read by the system tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTestEnv {
    /// Artifact root; each test writes below `<root>/<test name>`.
    RunRoot,
    /// Collaborator binary replacing the bundled stub server.
    StubProgram,
    /// Permit a run root that already holds a test summary.
    AllowOverwrite,
}

impl SystemTestEnv {
    /// Every key, in load order.
    pub const ALL: [Self; 3] = [Self::RunRoot, Self::StubProgram, Self::AllowOverwrite];

    /// Returns the environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunRoot => "SERVER_HARNESS_SYSTEM_TEST_RUN_ROOT",
            Self::StubProgram => "SERVER_HARNESS_SYSTEM_TEST_STUB",
            Self::AllowOverwrite => "SERVER_HARNESS_SYSTEM_TEST_ALLOW_OVERWRITE",
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// System-test settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemTestConfig {
    /// Artifact root override.
    pub run_root: Option<PathBuf>,
    /// Collaborator binary override.
    pub stub_program: Option<PathBuf>,
    /// Whether an existing summary may be overwritten.
    pub allow_overwrite: bool,
}

impl SystemTestConfig {
    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] for blank, non-UTF-8, or malformed values.
    pub fn load() -> Result<Self, HarnessError> {
        Self::from_lookup(read_env_nonempty)
    }

    /// Builds settings from `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Propagates lookup errors and rejects malformed booleans.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Result<Option<String>, HarnessError>,
    ) -> Result<Self, HarnessError> {
        let allow_name = SystemTestEnv::AllowOverwrite.as_str();
        Ok(Self {
            run_root: lookup(SystemTestEnv::RunRoot.as_str())?.map(PathBuf::from),
            stub_program: lookup(SystemTestEnv::StubProgram.as_str())?.map(PathBuf::from),
            allow_overwrite: parse_bool_env(allow_name, lookup(allow_name)?)?,
        })
    }
}
