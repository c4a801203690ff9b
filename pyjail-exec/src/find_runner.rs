//! Finds the location of the `pyjail-runner` executable.

use std::path::PathBuf;

/// Environment variable overriding the location of the runner.
pub const RUNNER_PATH_ENV: &str = "PYJAIL_RUNNER_PATH";

/// Locates the `pyjail-runner` executable.
pub fn find_runner_path() -> PathBuf {
    if let Some(path) = std::env::var_os(RUNNER_PATH_ENV) {
        return path.into();
    }
    // Check in the directory of the current executable.
    if let Ok(current_exe) = std::env::current_exe() {
        let candidate = current_exe.with_file_name(crate::workspace::RUNNER_NAME);
        if candidate.exists() {
            return candidate;
        }
    }
    which::which(crate::workspace::RUNNER_NAME)
        .unwrap_or_else(|_| crate::workspace::RUNNER_NAME.into())
}
