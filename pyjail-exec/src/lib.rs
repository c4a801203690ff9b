//! Sandboxed execution of untrusted Python scripts.
//!
//! This crate takes the source of a script, runs its `main()` function inside an isolated
//! environment and returns the JSON value it produced together with everything it printed.
//!
//! An execution goes through these phases:
//!
//! - the body of the request is validated ([`validate`]);
//! - the binaries needed for launching are checked ([`SandboxLauncher::check`]);
//! - a private [`Workspace`] is created with the script and a copy of the runner;
//! - the sandbox is launched on the workspace and supervised with an external deadline
//!   ([`SandboxLauncher::launch`]);
//! - the artifact left by the runner is read back and turned into a result ([`collect`]);
//! - the workspace is removed.
//!
//! [`ScriptExecutor`] glues all the phases together.
//!
//! ## The runner
//!
//! The code that actually touches the script lives in the [`runner`] module and is executed by the
//! `pyjail-runner` binary inside the sandbox. It never prints anything meaningful: its only output
//! is the JSON artifact written atomically in its working directory (see [`RunnerOutcome`]) and its
//! exit code.
//!
//! ## Sandboxing
//!
//! [`NsjailLauncher`] runs the runner inside `nsjail`, with a fresh set of namespaces, no network,
//! an unprivileged user, resource limits and only a few host directories mounted read-only. The
//! workspace is the only writable mount. [`UnsandboxedLauncher`] runs the runner directly and must
//! only be used for development.

#![deny(missing_docs)]

#[macro_use]
extern crate log;

pub use collector::{collect, ExecutionSuccess, DIAGNOSTIC_TAIL_CHARS};
pub use config::{check_executable, ResourceLimits, SandboxConfig, READABLE_DIRS};
pub use error::{ErrorCategory, ExecutionError};
pub use executor::ScriptExecutor;
pub use find_runner::{find_runner_path, RUNNER_PATH_ENV};
pub use launcher::{
    supervise, LaunchReport, NsjailLauncher, SandboxLauncher, UnsandboxedLauncher,
    STDERR_TAIL_LIMIT,
};
pub use nsjail::{NsjailCommand, SANDBOX_HOSTNAME, SANDBOX_WORKDIR};
pub use outcome::{
    read_artifact, write_atomic, ArtifactError, RunnerOutcome, ARTIFACT_NAME, ARTIFACT_TMP_NAME,
};
pub use validate::{validate, ExecutionRequest, SCRIPT_FIELD};
pub use workspace::{Workspace, RUNNER_NAME, SCRIPT_NAME};

mod collector;
mod config;
mod error;
mod executor;
mod find_runner;
mod launcher;
mod nsjail;
mod outcome;
pub mod runner;
mod validate;
mod workspace;
