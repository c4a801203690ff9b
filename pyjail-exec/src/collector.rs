use serde::Serialize;
use serde_json::Value;

use crate::launcher::LaunchReport;
use crate::outcome::{read_artifact, ArtifactError, RunnerOutcome};
use crate::{ExecutionError, SandboxConfig, Workspace};

/// How many characters of the sandbox standard error are attached to a missing output error.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 500;

/// The result of a successful execution, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSuccess {
    /// The value returned by `main()`.
    pub result: Value,
    /// What the script printed.
    pub stdout: String,
}

/// Interpret the end of a launch attempt, reading the artifact from the workspace if the sandbox
/// actually ran.
///
/// A sandbox that ran for at least the time limit without leaving an artifact was killed by its
/// own time limit, and that is a timeout.
pub fn collect(
    launch: Result<LaunchReport, ExecutionError>,
    workspace: &Workspace,
    config: &SandboxConfig,
) -> Result<ExecutionSuccess, ExecutionError> {
    // no artifact is expected if the sandbox did not run to completion
    let report = launch?;
    debug!(
        "Sandbox at {} exited with {} after {:?}",
        workspace.path().display(),
        report.status,
        report.elapsed
    );
    let outcome = match read_artifact(workspace.path()) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return Err(missing_output(&report, config)),
        Err(ArtifactError::Parse(e)) => return Err(ExecutionError::MalformedOutput(e)),
        Err(ArtifactError::Io(e)) => {
            warn!("Cannot read the artifact: {}", e);
            return Err(missing_output(&report, config));
        }
    };
    match outcome {
        RunnerOutcome::Success { result, stdout } => Ok(ExecutionSuccess { result, stdout }),
        RunnerOutcome::Failure { error, stdout } => Err(ExecutionError::Script { error, stdout }),
    }
}

fn missing_output(report: &LaunchReport, config: &SandboxConfig) -> ExecutionError {
    if report.elapsed >= config.time_limit {
        debug!("No artifact after {:?}, the time limit fired", report.elapsed);
        return ExecutionError::Timeout(config.time_limit_secs());
    }
    ExecutionError::NoOutput {
        stderr_tail: diagnostic_tail(&report.stderr_tail),
    }
}

/// The last characters of the diagnostic stream, `None` if there is nothing interesting.
fn diagnostic_tail(stderr: &str) -> Option<String> {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return None;
    }
    let skip = stderr.chars().count().saturating_sub(DIAGNOSTIC_TAIL_CHARS);
    Some(stderr.chars().skip(skip).collect())
}
