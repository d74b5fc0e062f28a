// system-tests/tests/helpers/artifacts.rs
// ============================================================================
// Module: Test Reporter
// Description: Per-test artifact directory and JSON summary for system-tests.
// Purpose: Keep collaborator captures and a verdict next to each other on disk.
// Dependencies: system-tests, server-harness, serde, serde_jcs
// ============================================================================

//! ## Overview
//! Each test owns `<run root>/<test name>/` holding `captures/` (harness
//! stdout/stderr files), any attached JSON or text, and `summary.json`. The
//! summary is written in canonical JSON when the test passes, and from `Drop`
//! with status `panicked` when it unwinds.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use system_tests::config::SystemTestConfig;

/// Summary file written for every test.
const SUMMARY_FILE: &str = "summary.json";

/// Verdict recorded for one system test.
#[derive(Debug, Serialize)]
struct Summary<'a> {
    test: &'a str,
    status: &'a str,
    started_unix_ms: u128,
    duration_ms: u128,
    notes: &'a [String],
    attachments: &'a [String],
}

/// Collects notes and attachments for one test and writes its summary.
pub struct TestReporter {
    test: String,
    root: PathBuf,
    started: Instant,
    started_unix_ms: u128,
    notes: Vec<String>,
    attachments: Vec<String>,
    written: bool,
}

impl TestReporter {
    /// Creates `<run root>/<test>`; refuses to reuse one that holds a summary
    /// unless overwriting is allowed.
    pub fn new(test: &str) -> io::Result<Self> {
        let config = SystemTestConfig::load().map_err(io::Error::other)?;
        let started_unix_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let root = config
            .run_root
            .unwrap_or_else(|| {
                PathBuf::from("target/system-tests").join(format!("run_{started_unix_ms}"))
            })
            .join(test);
        if root.join(SUMMARY_FILE).exists() && !config.allow_overwrite {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already holds a summary", root.display()),
            ));
        }
        fs::create_dir_all(&root)?;
        Ok(Self {
            test: test.to_string(),
            root,
            started: Instant::now(),
            started_unix_ms,
            notes: Vec::new(),
            attachments: Vec::new(),
            written: false,
        })
    }

    /// Directory handed to the harness as its capture run root.
    pub fn captures_dir(&self) -> PathBuf {
        self.root.join("captures")
    }

    /// Adds a free-form note to the summary.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Writes `value` as canonical JSON and lists it in the summary.
    pub fn attach_json<T: Serialize>(&mut self, name: &str, value: &T) -> io::Result<PathBuf> {
        let bytes = serde_jcs::to_vec(value).map_err(io::Error::other)?;
        self.attach(name, &bytes)
    }

    /// Writes UTF-8 text and lists it in the summary.
    pub fn attach_text(&mut self, name: &str, text: &str) -> io::Result<PathBuf> {
        self.attach(name, text.as_bytes())
    }

    /// Records a passing verdict.
    pub fn pass(mut self) -> io::Result<()> {
        self.write_summary("pass")
    }

    fn attach(&mut self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        fs::write(&path, bytes)?;
        self.attachments.push(name.to_string());
        Ok(path)
    }

    fn write_summary(&mut self, status: &str) -> io::Result<()> {
        self.written = true;
        let summary = Summary {
            test: &self.test,
            status,
            started_unix_ms: self.started_unix_ms,
            duration_ms: self.started.elapsed().as_millis(),
            notes: &self.notes,
            attachments: &self.attachments,
        };
        let bytes = serde_jcs::to_vec(&summary).map_err(io::Error::other)?;
        fs::write(self.root.join(SUMMARY_FILE), bytes)
    }
}

impl Drop for TestReporter {
    fn drop(&mut self) {
        if self.written {
            return;
        }
        let status = if std::thread::panicking() { "panicked" } else { "incomplete" };
        let _ = self.write_summary(status);
    }
}
