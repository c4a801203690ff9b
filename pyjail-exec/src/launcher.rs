use std::io::{ErrorKind, Read};
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::nsjail::NsjailCommand;
use crate::{ExecutionError, SandboxConfig, Workspace};

/// How many bytes of the standard error of the sandbox are kept.
pub const STDERR_TAIL_LIMIT: usize = 4096;

/// How the sandboxed process terminated.
#[derive(Debug, Clone)]
pub struct LaunchReport {
    /// Exit status of the sandbox process.
    pub status: ExitStatus,
    /// The last bytes written by the sandbox on its standard error.
    pub stderr_tail: String,
    /// Wall time between the spawn and the exit of the sandbox.
    pub elapsed: Duration,
}

/// Something able to run the runner of a workspace, wait for it to exit and report how it went.
pub trait SandboxLauncher: Send + Sync {
    /// Check that everything needed for launching is in place, before allocating anything.
    fn check(&self, config: &SandboxConfig) -> Result<(), ExecutionError>;

    /// Run the runner on the workspace, blocking until it exits or gets killed.
    ///
    /// Only [`ExecutionError::Timeout`] and [`ExecutionError::Launch`] are expected from here: a
    /// script failure is not a launch failure.
    fn launch(
        &self,
        config: &SandboxConfig,
        workspace: &Workspace,
    ) -> Result<LaunchReport, ExecutionError>;
}

impl<S: SandboxLauncher + ?Sized> SandboxLauncher for Arc<S> {
    fn check(&self, config: &SandboxConfig) -> Result<(), ExecutionError> {
        self.as_ref().check(config)
    }

    fn launch(
        &self,
        config: &SandboxConfig,
        workspace: &Workspace,
    ) -> Result<LaunchReport, ExecutionError> {
        self.as_ref().launch(config, workspace)
    }
}

/// Runs the runner inside `nsjail`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NsjailLauncher;

impl SandboxLauncher for NsjailLauncher {
    fn check(&self, config: &SandboxConfig) -> Result<(), ExecutionError> {
        config.check_binaries(true)
    }

    fn launch(
        &self,
        config: &SandboxConfig,
        workspace: &Workspace,
    ) -> Result<LaunchReport, ExecutionError> {
        let mut command = Command::new(&config.nsjail_path);
        command.args(NsjailCommand::new(config, workspace.path()).args());
        supervise(
            command,
            config.external_deadline(),
            config.time_limit_secs(),
        )
    }
}

/// Runs the runner directly on the host, without any isolation. Only for development.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsandboxedLauncher;

impl SandboxLauncher for UnsandboxedLauncher {
    fn check(&self, config: &SandboxConfig) -> Result<(), ExecutionError> {
        config.check_binaries(false)
    }

    fn launch(
        &self,
        config: &SandboxConfig,
        workspace: &Workspace,
    ) -> Result<LaunchReport, ExecutionError> {
        let mut command = Command::new(workspace.runner_path());
        command
            .arg("--interpreter")
            .arg(&config.interpreter_path)
            .arg("--workdir")
            .arg(workspace.path())
            .current_dir(workspace.path());
        supervise(
            command,
            config.external_deadline(),
            config.time_limit_secs(),
        )
    }
}

/// Spawn the command in a new process group and wait for it for at most `deadline`.
///
/// When the deadline elapses the whole process group is killed and reaped, and a timeout
/// reporting `time_limit_secs` is returned. In any case no process of the group survives this
/// call.
pub fn supervise(
    mut command: Command,
    deadline: Duration,
    time_limit_secs: u64,
) -> Result<LaunchReport, ExecutionError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .process_group(0);
    trace!("Sandbox command: {:?}", command);
    let start = Instant::now();
    let mut child = command.spawn().map_err(ExecutionError::Launch)?;
    let group = scopeguard::guard(Pid::from_raw(child.id() as i32), kill_group);

    let stderr = child.stderr.take();
    let tail = std::thread::Builder::new()
        .name("sandbox stderr".into())
        .spawn(move || read_tail(stderr, STDERR_TAIL_LIMIT))
        .map_err(ExecutionError::Launch)?;

    let (sender, receiver) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name("sandbox waiter".into())
        .spawn(move || {
            let _ = sender.send(child.wait());
        })
        .map_err(ExecutionError::Launch)?;

    match receiver.recv_timeout(deadline) {
        Ok(Ok(status)) => {
            let elapsed = start.elapsed();
            drop(group);
            let stderr_tail = tail.join().unwrap_or_default();
            Ok(LaunchReport {
                status,
                stderr_tail,
                elapsed,
            })
        }
        Ok(Err(e)) => Err(ExecutionError::Launch(e)),
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                "Sandbox process {} still running after {:?}, killing it",
                *group, deadline
            );
            drop(group);
            // reap the killed process
            let _ = receiver.recv();
            Err(ExecutionError::Timeout(time_limit_secs))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::Launch(std::io::Error::new(
            ErrorKind::Other,
            "the sandbox waiter thread died",
        ))),
    }
}

/// Send `SIGKILL` to every process in the group.
fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => trace!("Killed process group {}", pgid),
        Err(Errno::ESRCH) => {}
        Err(e) => error!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Read the stream until the end keeping only the last `limit` bytes.
fn read_tail<R: Read>(reader: Option<R>, limit: usize) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut tail = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => tail.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
        if tail.len() > 2 * limit {
            tail.drain(..tail.len() - limit);
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    String::from_utf8_lossy(&tail).into_owned()
}
