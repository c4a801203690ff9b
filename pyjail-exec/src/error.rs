use thiserror::Error;

/// The coarse class of a failed execution, used by the callers to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request was rejected before any resource was allocated.
    Validation,
    /// The service is not set up correctly (missing binaries, ...).
    Configuration,
    /// The script did not finish before the supervisory deadline.
    Timeout,
    /// Something between the service and the sandbox broke.
    Infrastructure,
    /// The script itself failed.
    Script,
}

/// All the ways an execution request can fail.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The request is malformed, empty or too large.
    #[error("{0}")]
    Validation(String),
    /// A binary required for running the sandbox is missing or unusable.
    #[error("Sandbox misconfigured: {0}")]
    Configuration(String),
    /// The external deadline elapsed and the sandbox got killed.
    #[error("Execution timed out after {0} seconds.")]
    Timeout(u64),
    /// The sandbox process could not be started.
    #[error("Failed to start sandbox: {0}")]
    Launch(#[source] std::io::Error),
    /// The workspace could not be created or populated.
    #[error("Failed to prepare the workspace: {0:#}")]
    Workspace(#[source] anyhow::Error),
    /// The sandbox exited without leaving the output artifact.
    #[error("No output from sandboxed execution.{}", fmt_tail(.stderr_tail))]
    NoOutput {
        /// The last bytes written by the sandbox on its standard error, if any.
        stderr_tail: Option<String>,
    },
    /// The output artifact is there but it is not a valid runner outcome.
    #[error("Malformed output from sandboxed execution.")]
    MalformedOutput(#[source] serde_json::Error),
    /// The script failed: compilation error, missing `main`, exception, bad return value.
    #[error("{error}")]
    Script {
        /// The message produced by the runner.
        error: String,
        /// What the script printed before failing.
        stdout: String,
    },
}

fn fmt_tail(tail: &Option<String>) -> String {
    match tail {
        Some(tail) => format!(" [stderr: {tail}]"),
        None => String::new(),
    }
}

impl ExecutionError {
    /// The class of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Validation(_) => ErrorCategory::Validation,
            ExecutionError::Configuration(_) => ErrorCategory::Configuration,
            ExecutionError::Timeout(_) => ErrorCategory::Timeout,
            ExecutionError::Launch(_)
            | ExecutionError::Workspace(_)
            | ExecutionError::NoOutput { .. }
            | ExecutionError::MalformedOutput(_) => ErrorCategory::Infrastructure,
            ExecutionError::Script { .. } => ErrorCategory::Script,
        }
    }

    /// The message that can be shown to whoever sent the script.
    ///
    /// Configuration and workspace errors carry host paths, they are replaced by a generic text.
    pub fn public_message(&self) -> String {
        match self {
            ExecutionError::Configuration(_) => {
                "The sandbox is not configured correctly.".to_string()
            }
            ExecutionError::Workspace(_) => "Failed to prepare the sandbox.".to_string(),
            _ => self.to_string(),
        }
    }

    /// The standard output captured before the failure, only scripts errors have one.
    pub fn stdout(&self) -> Option<&str> {
        match self {
            ExecutionError::Script { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}
