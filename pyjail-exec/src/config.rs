use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ExecutionError;

/// The host directories mounted read-only inside the sandbox, if they exist.
pub const READABLE_DIRS: &[&str] = &[
    "/usr",
    "/usr/local",
    "/bin",
    "/lib",
    "/lib64",
    // CA certificates
    "/etc/ssl",
    // update-alternatives stuff, sometimes the interpreter is symlinked here
    "/etc/alternatives",
];

/// Hard resource ceilings of the sandboxed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum address space, in MiB.
    pub address_space_mib: u64,
    /// Maximum size of a written file, in MiB.
    pub file_size_mib: u64,
    /// Maximum number of open file descriptors.
    pub open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            address_space_mib: 4096,
            file_size_mib: 10,
            open_files: 128,
        }
    }
}

/// Process-wide configuration of the executions. Built once at start-up and never changed.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Path to the `nsjail` binary.
    pub nsjail_path: PathBuf,
    /// Path to the Python interpreter, as seen from inside the sandbox.
    pub interpreter_path: PathBuf,
    /// Path to the `pyjail-runner` executable to copy into each workspace.
    pub runner_path: PathBuf,
    /// Where to create the workspaces, `None` for the system temporary directory.
    pub workspace_dir: Option<PathBuf>,
    /// Wall-clock limit enforced by the sandbox itself.
    pub time_limit: Duration,
    /// Extra time given to the sandbox before being killed from the outside.
    pub grace_period: Duration,
    /// Maximum size of a script, in bytes.
    pub max_script_bytes: usize,
    /// Resource ceilings.
    pub limits: ResourceLimits,
    /// Unprivileged user id of the sandboxed process.
    pub uid: u32,
    /// Unprivileged group id of the sandboxed process.
    pub gid: u32,
    /// Host directories to mount read-only, skipped if missing.
    pub readable_dirs: Vec<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            nsjail_path: "/usr/bin/nsjail".into(),
            interpreter_path: "/usr/local/bin/python3".into(),
            runner_path: crate::find_runner::find_runner_path(),
            workspace_dir: None,
            time_limit: Duration::from_secs(30),
            grace_period: Duration::from_secs(2),
            max_script_bytes: 100_000_000,
            limits: ResourceLimits::default(),
            uid: 99999,
            gid: 99999,
            readable_dirs: READABLE_DIRS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl SandboxConfig {
    /// After how much time the sandbox gets killed from the outside.
    pub fn external_deadline(&self) -> Duration {
        self.time_limit + self.grace_period
    }

    /// The time limit in whole seconds, rounded up.
    pub fn time_limit_secs(&self) -> u64 {
        let secs = self.time_limit.as_secs();
        if self.time_limit.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Make sure the isolation binary, the interpreter and the runner are usable.
    ///
    /// There is no `$PATH` inside the sandbox, so the interpreter path must be absolute.
    pub fn check_binaries(&self, need_nsjail: bool) -> Result<(), ExecutionError> {
        if need_nsjail {
            check_executable("nsjail", &self.nsjail_path)?;
        }
        if !self.interpreter_path.is_absolute() {
            return Err(ExecutionError::Configuration(format!(
                "interpreter path {} must be absolute",
                self.interpreter_path.display()
            )));
        }
        check_executable("interpreter", &self.interpreter_path)?;
        check_executable("runner", &self.runner_path)?;
        Ok(())
    }
}

/// Check that `path` points to an executable file, looking it up in `$PATH` if it's just a name.
pub fn check_executable(what: &str, path: &Path) -> Result<PathBuf, ExecutionError> {
    let resolved = if path.components().count() > 1 {
        path.to_owned()
    } else {
        which::which(path).map_err(|e| {
            ExecutionError::Configuration(format!(
                "{what} binary {} not found in PATH: {e}",
                path.display()
            ))
        })?
    };
    let metadata = std::fs::metadata(&resolved).map_err(|e| {
        ExecutionError::Configuration(format!(
            "{what} binary {} not found: {e}",
            resolved.display()
        ))
    })?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(ExecutionError::Configuration(format!(
            "{what} binary {} is not an executable file",
            resolved.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_deadline() {
        let config = SandboxConfig {
            time_limit: Duration::from_secs(5),
            grace_period: Duration::from_millis(1500),
            ..Default::default()
        };
        assert_eq!(config.external_deadline(), Duration::from_millis(6500));
        assert_eq!(config.time_limit_secs(), 5);
        let config = SandboxConfig {
            time_limit: Duration::from_millis(1200),
            ..config
        };
        assert_eq!(config.time_limit_secs(), 2);
    }

    #[test]
    fn test_check_executable() {
        let tmpdir = TempDir::new().unwrap();
        let exe = tmpdir.path().join("exe");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        assert!(matches!(
            check_executable("test", &exe),
            Err(ExecutionError::Configuration(_))
        ));
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(check_executable("test", &exe).unwrap(), exe);
        assert!(check_executable("test", tmpdir.path()).is_err());
        assert!(check_executable("test", &tmpdir.path().join("missing")).is_err());
    }

    #[test]
    fn test_relative_interpreter_is_rejected() {
        let tmpdir = TempDir::new().unwrap();
        let runner = tmpdir.path().join("runner");
        std::fs::write(&runner, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();
        for interpreter in ["sh", "./sh", "bin/sh"] {
            let config = SandboxConfig {
                interpreter_path: interpreter.into(),
                runner_path: runner.clone(),
                ..Default::default()
            };
            let err = config.check_binaries(false).unwrap_err();
            assert!(matches!(err, ExecutionError::Configuration(_)));
            assert!(err.to_string().contains("must be absolute"), "{err}");
        }
        let config = SandboxConfig {
            interpreter_path: "/bin/sh".into(),
            runner_path: runner,
            ..Default::default()
        };
        assert!(config.check_binaries(false).is_ok());
    }

    #[test]
    fn test_missing_nsjail_is_configuration_error() {
        let config = SandboxConfig {
            nsjail_path: "/nonexistent/nsjail".into(),
            ..Default::default()
        };
        let err = config.check_binaries(true).unwrap_err();
        assert!(matches!(err, ExecutionError::Configuration(_)));
        assert!(err.to_string().contains("nsjail"));
    }
}
