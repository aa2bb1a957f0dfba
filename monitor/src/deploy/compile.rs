//! Compile step

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::StepError;
use crate::models::server::ServerRecord;

/// Compiler output marker for a clean build
pub const SUCCESS_MARKER: &str = "0 errors, 0 warnings";

/// True if the compiler's combined output reports a clean build.
///
/// The marker must start at a number boundary, so `10 errors, 0 warnings`
/// is not a match.
pub fn compile_succeeded(output: &str) -> bool {
    output
        .match_indices(SUCCESS_MARKER)
        .any(|(i, _)| !output[..i].ends_with(|c: char| c.is_ascii_digit()))
}

/// Line reported when a build fails: the compiler's error tally if present,
/// else the last line of output
pub fn failure_summary(output: &str) -> String {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let last = lines.clone().last();
    lines
        .rfind(|l| l.contains("errors,"))
        .or(last)
        .unwrap_or("no compiler output")
        .to_string()
}

/// Compile the server's source project
pub async fn compile(record: &ServerRecord) -> Result<(), StepError> {
    let compiler = record.compiler_path();
    let project = record.source_project_path();

    info!(server = %record.name(), project = %project.display(), "Compiling");

    let output = Command::new(&compiler)
        .arg(&project)
        .current_dir(record.git_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            StepError::CompileFailed(format!("failed to run {}: {}", compiler.display(), e))
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    debug!(server = %record.name(), status = %output.status, "Compiler finished");

    if compile_succeeded(&combined) {
        info!(server = %record.name(), "Compilation succeeded");
        Ok(())
    } else {
        Err(StepError::CompileFailed(failure_summary(&combined)))
    }
}
