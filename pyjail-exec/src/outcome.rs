//! The artifact exchanged between the runner, inside the sandbox, and the collector, outside.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the output artifact inside the workspace.
pub const ARTIFACT_NAME: &str = "runner_out.json";
/// Name of the file the artifact is written to before being renamed.
pub const ARTIFACT_TMP_NAME: &str = "runner_out.json.tmp";

/// What the runner reports about the execution of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", deny_unknown_fields)]
pub enum RunnerOutcome {
    /// `main()` returned a JSON value.
    Success {
        /// The value returned by `main()`.
        result: Value,
        /// The captured standard output.
        stdout: String,
    },
    /// The script failed at some stage.
    Failure {
        /// Human readable description of the failure.
        error: String,
        /// The standard output captured until the failure.
        stdout: String,
    },
}

impl RunnerOutcome {
    /// The captured standard output, whatever the outcome.
    pub fn stdout(&self) -> &str {
        match self {
            RunnerOutcome::Success { stdout, .. } | RunnerOutcome::Failure { stdout, .. } => stdout,
        }
    }
}

/// Write the outcome inside `dir` so that a reader never sees a partial file.
///
/// The content goes to a temporary file which is synced and then renamed over the final path.
pub fn write_atomic(dir: &Path, outcome: &RunnerOutcome) -> Result<(), Error> {
    let tmp = dir.join(ARTIFACT_TMP_NAME);
    let dest = dir.join(ARTIFACT_NAME);
    let file =
        File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, outcome).context("Failed to serialize the outcome")?;
    writer.flush().context("Failed to flush the outcome")?;
    writer
        .get_ref()
        .sync_all()
        .context("Failed to sync the outcome")?;
    drop(writer);
    std::fs::rename(&tmp, &dest)
        .with_context(|| format!("Failed to rename {} to {}", tmp.display(), dest.display()))?;
    Ok(())
}

/// Error reading the artifact back.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The file could not be read.
    #[error("Cannot read the artifact: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a valid outcome.
    #[error("Invalid artifact: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read the outcome written by the runner inside `dir`, `Ok(None)` if there is none.
pub fn read_artifact(dir: &Path) -> Result<Option<RunnerOutcome>, ArtifactError> {
    let data = match std::fs::read(dir.join(ARTIFACT_NAME)) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}
