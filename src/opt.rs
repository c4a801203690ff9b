use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use pyjail_exec::{
    check_executable, find_runner_path, ResourceLimits, SandboxConfig, RUNNER_PATH_ENV,
};

/// Version of the binaries, including the git revision they are built from.
pub const LONG_VERSION: &str = include_str!(concat!(env!("OUT_DIR"), "/version.txt"));

#[derive(Parser, Debug, Clone)]
#[clap(name = "pyjail", version, long_version = LONG_VERSION)]
pub struct Opt {
    /// Address to bind the HTTP server on
    #[clap(long, env = "PYJAIL_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    #[clap(flatten, next_help_heading = Some("SANDBOX"))]
    pub sandbox: SandboxOpt,

    #[clap(flatten, next_help_heading = Some("LOGGING"))]
    pub logger: LoggerOpt,
}

#[derive(Parser, Debug, Clone)]
pub struct SandboxOpt {
    /// Path to the nsjail binary
    #[clap(long = "nsjail-bin", env = "NSJAIL_BIN", default_value = "/usr/bin/nsjail")]
    pub nsjail_bin: PathBuf,

    /// Path to the Python interpreter, as seen from inside the sandbox
    #[clap(
        long = "python-bin",
        env = "PYTHON_BIN",
        default_value = "/usr/local/bin/python3"
    )]
    pub python_bin: PathBuf,

    /// Path to the pyjail-runner executable
    ///
    /// By default it's searched next to the current executable and then in $PATH.
    #[clap(long = "runner-bin", env = RUNNER_PATH_ENV)]
    pub runner_bin: Option<PathBuf>,

    /// Wall clock time limit of a script, in seconds
    #[clap(
        long = "timeout",
        env = "EXECUTION_TIMEOUT_SECONDS",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Maximum size of a script, in bytes
    #[clap(long = "max-request-bytes", env = "REQUEST_MAX_BYTES", default_value = "100000000")]
    pub max_request_bytes: usize,

    /// Extra time given to the sandbox before it gets killed from the outside, in milliseconds
    #[clap(long = "grace-period-ms", env = "PYJAIL_GRACE_PERIOD_MS", default_value = "2000")]
    pub grace_period_ms: u64,

    /// Maximum address space of the script, in MiB
    #[clap(long = "rlimit-as", env = "PYJAIL_RLIMIT_AS", default_value = "4096")]
    pub rlimit_as: u64,

    /// Maximum size of a file written by the script, in MiB
    #[clap(long = "rlimit-fsize", env = "PYJAIL_RLIMIT_FSIZE", default_value = "10")]
    pub rlimit_fsize: u64,

    /// Maximum number of open file descriptors of the script
    #[clap(long = "rlimit-nofile", env = "PYJAIL_RLIMIT_NOFILE", default_value = "128")]
    pub rlimit_nofile: u64,

    /// User id the script runs as
    #[clap(long = "sandbox-uid", env = "PYJAIL_SANDBOX_UID", default_value = "99999")]
    pub sandbox_uid: u32,

    /// Group id the script runs as
    #[clap(long = "sandbox-gid", env = "PYJAIL_SANDBOX_GID", default_value = "99999")]
    pub sandbox_gid: u32,

    /// Where to create the workspaces of the executions
    #[clap(long = "workspace-dir", env = "PYJAIL_WORKSPACE_DIR")]
    pub workspace_dir: Option<PathBuf>,

    /// Run the scripts without any sandbox. Never use this in production!
    #[clap(long = "no-sandbox")]
    pub no_sandbox: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct LoggerOpt {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SandboxOpt {
    /// Build the configuration shared by all the executions.
    pub fn to_config(&self) -> SandboxConfig {
        SandboxConfig {
            nsjail_path: self.nsjail_bin.clone(),
            interpreter_path: self.interpreter_path(),
            runner_path: self.runner_bin.clone().unwrap_or_else(find_runner_path),
            workspace_dir: self.workspace_dir.clone(),
            time_limit: Duration::from_secs(self.timeout),
            grace_period: Duration::from_millis(self.grace_period_ms),
            max_script_bytes: self.max_request_bytes,
            limits: ResourceLimits {
                address_space_mib: self.rlimit_as,
                file_size_mib: self.rlimit_fsize,
                open_files: self.rlimit_nofile,
            },
            uid: self.sandbox_uid,
            gid: self.sandbox_gid,
            ..SandboxConfig::default()
        }
    }
}

impl SandboxOpt {
    /// The interpreter passed on the command line, looked up in `$PATH` if it's just a name.
    fn interpreter_path(&self) -> PathBuf {
        if self.python_bin.components().count() > 1 {
            return self.python_bin.clone();
        }
        match check_executable("interpreter", &self.python_bin) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("{}", e);
                self.python_bin.clone()
            }
        }
    }
}

impl LoggerOpt {
    pub fn enable_log(&self) {
        match self.verbose {
            0 => {
                if std::env::var_os("RUST_LOG").is_none() {
                    std::env::set_var("RUST_LOG", "warn");
                }
            }
            1 => std::env::set_var("RUST_LOG", "info"),
            2 => std::env::set_var("RUST_LOG", "debug"),
            _ => std::env::set_var("RUST_LOG", "trace"),
        }
        if self.verbose > 0 {
            std::env::set_var("RUST_BACKTRACE", "1");
        }

        env_logger::Builder::from_default_env()
            .format_timestamp_nanos()
            .init();
        better_panic::install();
    }
}
