// system-tests/src/bin/stub_inference_server.rs
// ============================================================================
// Module: Stub Inference Server Binary
// Description: Collaborator process launched by harness system tests.
// Purpose: Provide a dedicated server binary for end-to-end lifecycle tests.
// Dependencies: clap, system-tests, tokio
// ============================================================================

//! Stub inference server binary for system-tests. Argument errors exit with
//! code 1 so the harness sees an early crash.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use system_tests::stub::StubArgs;
use system_tests::stub::serve;

/// Exit code for argument and startup failures.
const FAILURE_CODE: u8 = 1;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = match StubArgs::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::from(FAILURE_CODE) } else { ExitCode::SUCCESS };
        }
    };
    if let Some(code) = args.exit_code {
        write_stderr_line(&format!("stub_inference_server: exiting early with code {code}"));
        return ExitCode::from(code);
    }
    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            write_stderr_line(&format!("stub_inference_server: server failed: {err}"));
            ExitCode::from(FAILURE_CODE)
        }
    }
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
}
