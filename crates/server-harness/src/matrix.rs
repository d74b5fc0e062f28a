// crates/server-harness/src/matrix.rs
// ============================================================================
// Module: Launch Matrix
// Description: Declarative per-model launch configurations loaded from TOML.
// Purpose: Replace inherited fixture classes with data-driven launch entries.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! A matrix holds shared `[defaults]` and a list of `[[server]]` entries. Each
//! entry resolves into a [`LaunchSpec`]: entry values override defaults, entry
//! environment overrides default environment per key, and default arguments
//! precede entry arguments. Thresholds are carried as data for the calling
//! test to compare against; the harness never evaluates them.
//!
//! ```toml
//! [defaults]
//! program = "python3"
//! program_args = ["-m", "inference.launch_server"]
//! base_url = "http://127.0.0.1:21000"
//!
//! [[server]]
//! name = "small"
//! model = "org/small-model"
//! args = ["--tp", 2]
//! thresholds = { accuracy = 0.62 }
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::HarnessError;
use crate::spec::LaunchArg;
use crate::spec::LaunchSpec;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum matrix file size in bytes.
const MAX_MATRIX_FILE_SIZE: usize = 256 * 1024;

// ============================================================================
// SECTION: Document Types
// ============================================================================

/// Values shared by every entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixDefaults {
    /// Default executable.
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments placed before the model flag.
    #[serde(default)]
    pub program_args: Vec<LaunchArg>,
    /// Default base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Default health path.
    #[serde(default)]
    pub health_path: Option<String>,
    /// Default startup timeout in seconds.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
    /// Shared environment overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Arguments placed before each entry's arguments.
    #[serde(default)]
    pub args: Vec<LaunchArg>,
}

/// One server configuration in the matrix.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixEntry {
    /// Unique entry name.
    pub name: String,
    /// Model identifier passed with the model flag.
    #[serde(default)]
    pub model: Option<String>,
    /// Executable override.
    #[serde(default)]
    pub program: Option<String>,
    /// Entry arguments.
    #[serde(default)]
    pub args: Vec<LaunchArg>,
    /// Entry environment overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Bearer token for health checks and probes.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Health path override.
    #[serde(default)]
    pub health_path: Option<String>,
    /// Startup timeout override in seconds.
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
    /// Named numeric thresholds for the calling test.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

/// Raw document shape.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatrixDocument {
    /// Shared defaults.
    #[serde(default)]
    defaults: MatrixDefaults,
    /// Entries in document order.
    #[serde(default)]
    server: Vec<MatrixEntry>,
}

// ============================================================================
// SECTION: Launch Matrix
// ============================================================================

/// Validated launch matrix.
#[derive(Debug, Clone)]
pub struct LaunchMatrix {
    /// Shared defaults.
    defaults: MatrixDefaults,
    /// Entries in document order.
    entries: Vec<MatrixEntry>,
}

impl LaunchMatrix {
    /// Parses and validates a matrix from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Matrix`] on parse errors, empty or duplicate
    /// names, or entries with no program.
    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        let document: MatrixDocument =
            toml::from_str(text).map_err(|err| HarnessError::Matrix(err.to_string()))?;
        let matrix = Self {
            defaults: document.defaults,
            entries: document.server,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Reads and validates a matrix file.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Matrix`] when the file cannot be read, is too
    /// large, is not UTF-8, or fails validation.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let bytes = fs::read(path)
            .map_err(|err| HarnessError::Matrix(format!("read {} failed: {err}", path.display())))?;
        if bytes.len() > MAX_MATRIX_FILE_SIZE {
            return Err(HarnessError::Matrix(format!(
                "{} exceeds {MAX_MATRIX_FILE_SIZE} bytes",
                path.display()
            )));
        }
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| HarnessError::Matrix(format!("{} must be utf-8", path.display())))?;
        Self::from_toml_str(text)
    }

    /// Returns the shared defaults.
    #[must_use]
    pub const fn defaults(&self) -> &MatrixDefaults {
        &self.defaults
    }

    /// Returns all entries in document order.
    #[must_use]
    pub fn entries(&self) -> &[MatrixEntry] {
        &self.entries
    }

    /// Returns entry names in document order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&MatrixEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Returns a named threshold for an entry.
    #[must_use]
    pub fn threshold(&self, name: &str, metric: &str) -> Option<f64> {
        self.entry(name).and_then(|entry| entry.thresholds.get(metric).copied())
    }

    /// Resolves an entry into a launch spec.
    ///
    /// `base_url` overrides the default base URL; callers running entries in
    /// parallel pass distinct URLs here.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Matrix`] for unknown entries or a missing base
    /// URL, and [`HarnessError::InvalidSpec`] when the resolved spec is invalid.
    pub fn launch_spec(&self, name: &str, base_url: Option<&str>) -> Result<LaunchSpec, HarnessError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| HarnessError::Matrix(format!("unknown matrix entry: {name}")))?;
        let program = self
            .resolve_program(entry)
            .ok_or_else(|| HarnessError::Matrix(format!("entry {name} has no program")))?;
        let base_url = base_url
            .or(self.defaults.base_url.as_deref())
            .ok_or_else(|| HarnessError::Matrix(format!("entry {name} has no base url")))?;
        let mut env = self.defaults.env.clone();
        env.extend(entry.env.iter().map(|(key, value)| (key.clone(), value.clone())));
        let mut builder = LaunchSpec::builder(program, base_url)
            .name(entry.name.clone())
            .args(self.defaults.args.iter().cloned())
            .args(entry.args.iter().cloned())
            .envs(env);
        for arg in &self.defaults.program_args {
            builder = builder.program_arg(arg.clone());
        }
        if let Some(model) = &entry.model {
            builder = builder.model(model.clone());
        }
        if let Some(api_key) = &entry.api_key {
            builder = builder.api_key(api_key.clone());
        }
        if let Some(path) = entry.health_path.as_ref().or(self.defaults.health_path.as_ref()) {
            builder = builder.health_path(path.clone());
        }
        if let Some(secs) = entry.startup_timeout_secs.or(self.defaults.startup_timeout_secs) {
            builder = builder.startup_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// Returns the entry program, falling back to the default.
    fn resolve_program<'a>(&'a self, entry: &'a MatrixEntry) -> Option<&'a str> {
        entry
            .program
            .as_deref()
            .or(self.defaults.program.as_deref())
            .filter(|program| !program.trim().is_empty())
    }

    /// Rejects empty or duplicate names and entries with no program.
    fn validate(&self) -> Result<(), HarnessError> {
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            if entry.name.trim().is_empty() {
                return Err(HarnessError::Matrix("entry name must not be empty".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(HarnessError::Matrix(format!("duplicate entry name: {}", entry.name)));
            }
            if self.resolve_program(entry).is_none() {
                return Err(HarnessError::Matrix(format!("entry {} has no program", entry.name)));
            }
            if entry.startup_timeout_secs == Some(0) {
                return Err(HarnessError::Matrix(format!(
                    "entry {} startup_timeout_secs must be positive",
                    entry.name
                )));
            }
        }
        if self.defaults.startup_timeout_secs == Some(0) {
            return Err(HarnessError::Matrix(
                "defaults startup_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
