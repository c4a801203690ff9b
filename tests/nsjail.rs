use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use speculoos::prelude::*;
use tempfile::TempDir;

use pyjail_exec::{ExecutionError, NsjailLauncher, SandboxConfig, ScriptExecutor};

mod common;

use common::{fake_nsjail, find_python, local_config, process_is_gone, setup};

/// An executor using nsjail, `None` if nsjail cannot be used on this machine.
fn nsjail_executor() -> Option<ScriptExecutor> {
    setup();
    let python = find_python()?;
    let Ok(nsjail) = which::which("nsjail") else {
        eprintln!("nsjail not found, skipping the test");
        return None;
    };
    let config = SandboxConfig {
        nsjail_path: nsjail,
        ..local_config(python, Duration::from_secs(5))
    };
    let executor = ScriptExecutor::new(config, NsjailLauncher);
    // nsjail may be there but without the privileges for creating the namespaces
    match executor.execute_script("def main():\n    return 1\n") {
        Ok(res) if res.result == json!(1) => Some(executor),
        other => {
            eprintln!("nsjail is not usable here ({other:?}), skipping the test");
            None
        }
    }
}

fn assert_script_error(res: Result<pyjail_exec::ExecutionSuccess, ExecutionError>) -> String {
    match res {
        Err(ExecutionError::Script { error, .. }) => error,
        other => panic!("Expecting a script error, got {other:?}"),
    }
}

#[test]
fn test_host_files_are_not_visible() {
    let Some(executor) = nsjail_executor() else {
        return;
    };
    let error = assert_script_error(
        executor.execute_script("def main():\n    return open('/etc/passwd').read()\n"),
    );
    assert!(error.starts_with("main() raised: FileNotFoundError"), "{error}");
}

#[test]
fn test_network_is_not_reachable() {
    let Some(executor) = nsjail_executor() else {
        return;
    };
    let script = "import socket\n\
                  def main():\n    \
                  s = socket.create_connection(('1.1.1.1', 53), timeout=2)\n    \
                  return 'connected'\n";
    let error = assert_script_error(executor.execute_script(script));
    assert!(error.starts_with("main() raised: OSError"), "{error}");
}

#[test]
fn test_unprivileged_user() {
    let Some(executor) = nsjail_executor() else {
        return;
    };
    let res = executor
        .execute_script("import os\ndef main():\n    return [os.getuid(), os.getgid()]\n")
        .unwrap();
    assert_eq!(res.result, json!([99999, 99999]));
}

#[test]
fn test_workspace_is_the_working_directory() {
    let Some(executor) = nsjail_executor() else {
        return;
    };
    let res = executor
        .execute_script(
            "import os\ndef main():\n    open('scratch.txt', 'w').write('x')\n    return sorted(os.listdir('.'))\n",
        )
        .unwrap();
    assert_eq!(
        res.result,
        json!(["pyjail-runner", "scratch.txt", "user_script.py"])
    );
}

/// An executor going through [`NsjailLauncher`] with the fake `nsjail`. The grace period is long,
/// so the limit that fires first is the one of the jail.
fn fake_jail_executor(tmpdir: &TempDir, time_limit: Duration) -> Option<ScriptExecutor> {
    setup();
    let python = find_python()?;
    let config = SandboxConfig {
        nsjail_path: fake_nsjail(tmpdir.path()),
        grace_period: Duration::from_secs(5),
        ..local_config(python, time_limit)
    };
    Some(ScriptExecutor::new(config, NsjailLauncher))
}

#[test]
fn test_fake_jail_success() {
    let tmpdir = TempDir::new().unwrap();
    let Some(executor) = fake_jail_executor(&tmpdir, Duration::from_secs(10)) else {
        return;
    };
    let res = executor
        .execute_script("print('hi')\ndef main():\n    return [1, 'two']\n")
        .unwrap();
    assert_eq!(res.result, json!([1, "two"]));
    assert_eq!(res.stdout, "hi\n");
}

#[test]
fn test_time_limit_of_the_jail_is_a_timeout() {
    let tmpdir = TempDir::new().unwrap();
    let Some(executor) = fake_jail_executor(&tmpdir, Duration::from_secs(1)) else {
        return;
    };
    let start = Instant::now();
    let err = executor
        .execute_script("def main():\n    while True:\n        pass\n")
        .unwrap_err();
    // killed by the jail, well before the external deadline
    assert_that!(start.elapsed()).is_less_than(Duration::from_secs(5));
    assert!(matches!(err, ExecutionError::Timeout(1)), "{err:?}");
    assert_eq!(err.to_string(), "Execution timed out after 1 seconds.");
}

#[test]
fn test_time_limit_of_the_jail_while_loading() {
    let tmpdir = TempDir::new().unwrap();
    let Some(executor) = fake_jail_executor(&tmpdir, Duration::from_secs(1)) else {
        return;
    };
    let err = executor
        .execute_script("import time\ntime.sleep(30)\ndef main():\n    return 1\n")
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Timeout(1)), "{err:?}");
}

#[test]
fn test_leftover_child_in_the_jail() {
    let tmpdir = TempDir::new().unwrap();
    let Some(executor) = fake_jail_executor(&tmpdir, Duration::from_secs(10)) else {
        return;
    };
    let pidfile = tmpdir.path().join("pid");
    let script = format!(
        "import subprocess\n\
         child = subprocess.Popen(['sleep', '60'])\n\
         open({:?}, 'w').write(str(child.pid))\n\
         print('started')\n\
         def main():\n    return 1\n",
        pidfile.display().to_string()
    );
    let start = Instant::now();
    let res = executor.execute_script(&script).unwrap();
    assert_that!(start.elapsed()).is_less_than(Duration::from_secs(5));
    assert_eq!(res.result, json!(1));
    assert_eq!(res.stdout, "started\n");

    let pid: i32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_is_gone(pid), "the child {pid} of the script survived");
}
