//! Thin wrapper around `tokio::process::Command` that attaches the binary
//! path to any spawn error so "No such file or directory" always says
//! *which* file was missing.
//!
//! The underlying `io::Error` is kept intact so callers can tell a missing
//! binary (`NotFound`) or a non-executable one (`PermissionDenied`) apart
//! from a program that ran and failed.

use std::ffi::OsStr;
use std::path::PathBuf;

/// A process could not be started at all.
#[derive(Debug)]
pub struct SpawnError {
    pub program: String,
    pub source: std::io::Error,
}

impl SpawnError {
    pub fn kind(&self) -> std::io::ErrorKind {
        self.source.kind()
    }
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to execute `{}`: {}", self.program, self.source)
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Extension trait that maps spawn errors to include the program path.
pub trait CommandErrorContext {
    /// Like `.output()` but the error includes the program name.
    fn output_with_context(
        &mut self,
    ) -> impl std::future::Future<Output = Result<std::process::Output, SpawnError>> + Send;
}

impl CommandErrorContext for tokio::process::Command {
    async fn output_with_context(&mut self) -> Result<std::process::Output, SpawnError> {
        let program = program_name(self.as_std());
        self.output()
            .await
            .map_err(|source| SpawnError { program, source })
    }
}

/// Extract the program name from a `std::process::Command`.
fn program_name(cmd: &std::process::Command) -> String {
    let prog: &OsStr = cmd.get_program();
    PathBuf::from(prog).display().to_string()
}

/// Lossy stdout/stderr as trimmed strings.
pub fn output_text(output: &std::process::Output) -> (String, String) {
    (
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    )
}
