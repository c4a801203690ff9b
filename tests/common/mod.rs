#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pyjail_exec::{SandboxConfig, ScriptExecutor, UnsandboxedLauncher, RUNNER_PATH_ENV};

pub const RUNNER_PATH: &str = env!("CARGO_BIN_EXE_pyjail-runner");

pub fn setup() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_nanos()
        .is_test(true)
        .try_init();
    std::env::set_var(RUNNER_PATH_ENV, RUNNER_PATH);
}

/// The Python interpreter of this machine, `None` if it's not installed.
pub fn find_python() -> Option<PathBuf> {
    match which::which("python3") {
        Ok(python) => Some(python),
        Err(_) => {
            eprintln!("python3 not found, skipping the test");
            None
        }
    }
}

/// The configuration for running the scripts on this machine with `python`.
pub fn local_config(python: PathBuf, time_limit: Duration) -> SandboxConfig {
    SandboxConfig {
        interpreter_path: python,
        runner_path: RUNNER_PATH.into(),
        time_limit,
        grace_period: Duration::from_millis(500),
        ..SandboxConfig::default()
    }
}

/// An executor running the scripts without a sandbox, `None` if Python is not available.
pub fn local_executor(time_limit: Duration) -> Option<ScriptExecutor> {
    setup();
    let python = find_python()?;
    Some(ScriptExecutor::new(
        local_config(python, time_limit),
        UnsandboxedLauncher,
    ))
}

/// Whether the process with that pid is gone, waiting a bit for it to be reaped.
pub fn process_is_gone(pid: i32) -> bool {
    (0..100).any(|_| {
        let dead = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        };
        if !dead {
            std::thread::sleep(Duration::from_millis(20));
        }
        dead
    })
}

/// Stands in for `nsjail`: runs the runner of the writable mount on the host and, like the real
/// one, kills the whole jail when its time limit fires.
const FAKE_NSJAIL: &str = r#"#!/bin/sh
limit=
workspace=
while [ "$#" -gt 0 ]; do
    case "$1" in
        --time_limit) limit=$2; shift 2 ;;
        --bindmount) workspace=${2%%:*}; shift 2 ;;
        --) shift; break ;;
        --quiet|--iface_no_lo|--disable_proc) shift ;;
        *) shift 2 ;;
    esac
done
# left: /sandbox/pyjail-runner --interpreter <python> --workdir /sandbox
( sleep "$limit"; echo "[E] run time >= time limit" >&2; kill -9 0 ) &
cd "$workspace" || exit 1
"$workspace/pyjail-runner" "$2" "$3" --workdir "$workspace"
"#;

/// Write the fake `nsjail` inside `dir`.
pub fn fake_nsjail(dir: &Path) -> PathBuf {
    let path = dir.join("nsjail");
    std::fs::write(&path, FAKE_NSJAIL).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
