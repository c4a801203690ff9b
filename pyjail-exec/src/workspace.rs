use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use tempfile::TempDir;

use crate::outcome::ARTIFACT_NAME;

/// Name of the untrusted script inside the workspace.
pub const SCRIPT_NAME: &str = "user_script.py";
/// Name of the runner executable inside the workspace.
pub const RUNNER_NAME: &str = "pyjail-runner";

/// The private directory of a single execution.
///
/// It holds the script, the runner and, after the execution, the artifact. The directory is
/// deleted when this value is dropped, whatever happened in between.
#[derive(Debug)]
pub struct Workspace {
    /// Handle to the temporary directory. It's always `Some(_)` except inside `Drop`.
    dir: Option<TempDir>,
}

impl Workspace {
    /// Create a fresh workspace inside `parent` (or the system temporary directory) with the
    /// script and a copy of the runner.
    ///
    /// If anything fails the partially populated directory is removed before returning.
    pub fn prepare(parent: Option<&Path>, script: &str, runner: &Path) -> Result<Workspace, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pyjail-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .context("Cannot create the workspace directory")?;
        let workspace = Workspace { dir: Some(dir) };
        trace!("Setting up workspace at {}", workspace.path().display());

        let script_path = workspace.script_path();
        std::fs::write(&script_path, script)
            .with_context(|| format!("Failed to write {}", script_path.display()))?;
        set_permissions(&script_path, 0o444)?;

        let runner_path = workspace.runner_path();
        std::fs::copy(runner, &runner_path).with_context(|| {
            format!(
                "Failed to copy the runner from {} to {}",
                runner.display(),
                runner_path.display()
            )
        })?;
        set_permissions(&runner_path, 0o555)?;

        trace!("Workspace at {} ready!", workspace.path().display());
        Ok(workspace)
    }

    /// Path of the workspace on the host.
    pub fn path(&self) -> &Path {
        // this unwrap is safe since only `Drop` will remove the dir
        self.dir.as_ref().unwrap().path()
    }

    /// Path of the untrusted script.
    pub fn script_path(&self) -> PathBuf {
        self.path().join(SCRIPT_NAME)
    }

    /// Path of the runner executable.
    pub fn runner_path(&self) -> PathBuf {
        self.path().join(RUNNER_NAME)
    }

    /// Path of the artifact written by the runner.
    pub fn artifact_path(&self) -> PathBuf {
        self.path().join(ARTIFACT_NAME)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_owned();
        // the script may have removed the write bit from its own directory
        if set_permissions(&path, 0o700).is_err() {
            warn!("Cannot 'chmod 700' the workspace at {}", path.display());
        }
        match dir.close() {
            Ok(()) => trace!("Workspace at {} removed", path.display()),
            Err(e) => warn!("Failed to remove the workspace at {}: {}", path.display(), e),
        }
    }
}

fn set_permissions(path: &Path, mode: u32) -> Result<(), Error> {
    let mut permissions = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat {}", path.display()))?
        .permissions();
    permissions.set_mode(mode);
    std::fs::set_permissions(path, permissions)
        .with_context(|| format!("Cannot chmod {}", path.display()))?;
    Ok(())
}
