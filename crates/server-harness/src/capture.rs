// crates/server-harness/src/capture.rs
// ============================================================================
// Module: Output Capture
// Description: Stdout/stderr sinks for collaborator processes.
// Purpose: Route output per launch spec and excerpt stderr for diagnostics.
// Dependencies: tempfile
// ============================================================================

//! ## Overview
//! [`CaptureSinks`] turns [`OutputTarget`] values into [`Stdio`] handles.
//! `Capture` targets write into a per-launch directory: a temporary directory
//! removed at teardown, or a persistent directory under the configured run root.
//! Invariants:
//! - Sinks are scoped to one launch/terminate cycle.
//! - `File` targets are caller-owned and never removed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tempfile::TempDir;

use crate::error::HarnessError;
use crate::spec::OutputTarget;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum lines kept in a stderr excerpt.
pub const STDERR_EXCERPT_LINES: usize = 40;
/// Maximum bytes kept in a stderr excerpt.
pub const STDERR_EXCERPT_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Capture Sinks
// ============================================================================

/// Directory holding harness-owned capture files.
#[derive(Debug)]
enum CaptureDir {
    /// Removed when the sinks are closed.
    Temp(TempDir),
    /// Persisted under the run root.
    Persistent(PathBuf),
}

impl CaptureDir {
    /// Returns the directory path.
    fn path(&self) -> &Path {
        match self {
            Self::Temp(dir) => dir.path(),
            Self::Persistent(path) => path,
        }
    }
}

/// Output sinks for one collaborator launch.
#[derive(Debug)]
pub struct CaptureSinks {
    /// Harness-owned directory, created only when a `Capture` target is used.
    dir: Option<CaptureDir>,
    /// Resolved stdout file, when the stream goes to a file.
    stdout_path: Option<PathBuf>,
    /// Resolved stderr file, when the stream goes to a file.
    stderr_path: Option<PathBuf>,
    /// Whether harness-owned files survive `close`.
    keep: bool,
}

impl CaptureSinks {
    /// Prepares sinks for the given targets and returns the child stdio handles.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Capture`] when a file or directory cannot be created.
    pub fn open(
        name: &str,
        stdout: &OutputTarget,
        stderr: &OutputTarget,
        run_root: Option<&Path>,
        keep: bool,
    ) -> Result<(Self, Stdio, Stdio), HarnessError> {
        let needs_dir = matches!(stdout, OutputTarget::Capture)
            || matches!(stderr, OutputTarget::Capture);
        let dir = if needs_dir { Some(create_capture_dir(name, run_root)?) } else { None };
        let keep = keep || matches!(dir, Some(CaptureDir::Persistent(_)));
        let mut sinks = Self {
            dir,
            stdout_path: None,
            stderr_path: None,
            keep,
        };
        let (stdout_stdio, stdout_path) = sinks.resolve(stdout, "stdout.log")?;
        let (stderr_stdio, stderr_path) = sinks.resolve(stderr, "stderr.log")?;
        sinks.stdout_path = stdout_path;
        sinks.stderr_path = stderr_path;
        Ok((sinks, stdout_stdio, stderr_stdio))
    }

    /// Returns the stdout file path, when captured.
    #[must_use]
    pub fn stdout_path(&self) -> Option<&Path> {
        self.stdout_path.as_deref()
    }

    /// Returns the stderr file path, when captured.
    #[must_use]
    pub fn stderr_path(&self) -> Option<&Path> {
        self.stderr_path.as_deref()
    }

    /// Reads captured stdout as lossy UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Capture`] when the file cannot be read.
    pub fn read_stdout(&self) -> Result<Option<String>, HarnessError> {
        read_lossy(self.stdout_path.as_deref())
    }

    /// Reads captured stderr as lossy UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Capture`] when the file cannot be read.
    pub fn read_stderr(&self) -> Result<Option<String>, HarnessError> {
        read_lossy(self.stderr_path.as_deref())
    }

    /// Returns the tail of captured stderr, or `None` when not captured or unreadable.
    ///
    /// Only the last [`STDERR_EXCERPT_BYTES`] of the file are read.
    #[must_use]
    pub fn stderr_excerpt(&self) -> Option<String> {
        let path = self.stderr_path.as_deref()?;
        read_tail(path).ok().map(|text| excerpt_tail(&text))
    }

    /// Closes the sinks, removing harness-owned temporary files unless kept.
    pub fn close(&mut self) {
        match self.dir.take() {
            Some(CaptureDir::Temp(dir)) if self.keep => {
                let _ = dir.keep();
            }
            Some(CaptureDir::Temp(dir)) => {
                let removed_root = dir.path().to_path_buf();
                let _ = dir.close();
                self.forget_paths_under(&removed_root);
            }
            Some(CaptureDir::Persistent(_)) | None => {}
        }
    }

    /// Resolves one output target into a stdio handle and optional file path.
    fn resolve(
        &self,
        target: &OutputTarget,
        file_name: &str,
    ) -> Result<(Stdio, Option<PathBuf>), HarnessError> {
        match target {
            OutputTarget::Inherit => Ok((Stdio::inherit(), None)),
            OutputTarget::Discard => Ok((Stdio::null(), None)),
            OutputTarget::File(path) => {
                let file = create_file(path)?;
                Ok((Stdio::from(file), Some(path.clone())))
            }
            OutputTarget::Capture => {
                let dir = self
                    .dir
                    .as_ref()
                    .ok_or_else(|| HarnessError::Capture("capture dir missing".to_string()))?;
                let path = dir.path().join(file_name);
                let file = create_file(&path)?;
                Ok((Stdio::from(file), Some(path)))
            }
        }
    }

    /// Drops file paths that pointed into a removed directory.
    fn forget_paths_under(&mut self, root: &Path) {
        if self.stdout_path.as_deref().is_some_and(|path| path.starts_with(root)) {
            self.stdout_path = None;
        }
        if self.stderr_path.as_deref().is_some_and(|path| path.starts_with(root)) {
            self.stderr_path = None;
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Creates the per-launch capture directory.
fn create_capture_dir(name: &str, run_root: Option<&Path>) -> Result<CaptureDir, HarnessError> {
    if let Some(root) = run_root {
        let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let path = root.join(format!("{}_{stamp}", path_label(name)));
        fs::create_dir_all(&path).map_err(|err| {
            HarnessError::Capture(format!("create {} failed: {err}", path.display()))
        })?;
        return Ok(CaptureDir::Persistent(path));
    }
    tempfile::Builder::new()
        .prefix(&format!("server-harness-{}-", path_label(name)))
        .tempdir()
        .map(CaptureDir::Temp)
        .map_err(|err| HarnessError::Capture(format!("create temp capture dir failed: {err}")))
}

/// Maps a launch name onto a single path component.
///
/// Separators, dots, and other non-label characters become `-`, so names such
/// as `org/model` or `../x` stay inside the capture root.
#[must_use]
pub fn path_label(name: &str) -> String {
    let label: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '-' })
        .collect();
    if label.trim_matches('-').is_empty() { "server".to_string() } else { label }
}

/// Creates (or truncates) a capture file, creating parent directories.
fn create_file(path: &Path) -> Result<File, HarnessError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            HarnessError::Capture(format!("create {} failed: {err}", parent.display()))
        })?;
    }
    File::create(path)
        .map_err(|err| HarnessError::Capture(format!("create {} failed: {err}", path.display())))
}

/// Reads a capture file as lossy UTF-8.
fn read_lossy(path: Option<&Path>) -> Result<Option<String>, HarnessError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let bytes = fs::read(path)
        .map_err(|err| HarnessError::Capture(format!("read {} failed: {err}", path.display())))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Reads at most the last [`STDERR_EXCERPT_BYTES`] of a capture file.
fn read_tail(path: &Path) -> Result<String, HarnessError> {
    let map_err =
        |err: std::io::Error| HarnessError::Capture(format!("read {} failed: {err}", path.display()));
    let mut file = File::open(path).map_err(map_err)?;
    let len = file.metadata().map_err(map_err)?.len();
    let window = u64::try_from(STDERR_EXCERPT_BYTES).unwrap_or(u64::MAX);
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start)).map_err(map_err)?;
    let mut bytes = Vec::new();
    file.take(window).read_to_end(&mut bytes).map_err(map_err)?;
    // Skip UTF-8 continuation bytes left over from a cut character.
    let skip = if start > 0 {
        bytes.iter().take_while(|byte| (**byte & 0b1100_0000) == 0b1000_0000).count()
    } else {
        0
    };
    Ok(String::from_utf8_lossy(&bytes[skip..]).into_owned())
}

/// Returns the last lines of `text`, bounded by line and byte limits.
#[must_use]
pub fn excerpt_tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_EXCERPT_LINES);
    let tail = lines[start..].join("\n");
    if tail.len() <= STDERR_EXCERPT_BYTES {
        return tail;
    }
    let mut cut = tail.len() - STDERR_EXCERPT_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail[cut..].to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
