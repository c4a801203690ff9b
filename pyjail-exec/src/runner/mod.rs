//! The runner: the only code that touches the untrusted script, executed inside the sandbox.
//!
//! The runner starts the interpreter on a small fixed bootstrap program which loads the script in
//! a fresh namespace, calls its `main()` and checks that the returned value is JSON. The
//! bootstrap tells the runner how far it got with a single JSON report written on the original
//! standard error of the interpreter; the standard error of the script is sent to `/dev/null`.
//! The standard output of the interpreter is captured by the runner for the whole execution.
//! Once the interpreter exits the runner stops waiting on its pipes shortly after: processes left
//! behind by the script are killed together with the runner, by the sandbox.
//!
//! Whatever happens, the runner writes a [`RunnerOutcome`] atomically in its working directory
//! and exits with a code describing the outcome.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Error};
use serde::Deserialize;
use serde_json::Value;

use crate::outcome::{write_atomic, RunnerOutcome};
use crate::workspace::SCRIPT_NAME;

pub use capture::{PipeCapture, STDOUT_LIMIT, TRUNCATION_MARKER};

mod capture;

/// Exit code of a successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when the artifact cannot be written.
pub const EXIT_WRITE_FAILED: i32 = 91;
/// Maximum size of the report of the bootstrap, which embeds the encoded result.
pub const REPORT_LIMIT: usize = 64 * 1024 * 1024;
/// How long the pipes of the interpreter are drained after it exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// The program executed by the interpreter, with the name of the script as its only argument.
pub const BOOTSTRAP: &str = r#"
import json, os, sys

_report = os.fdopen(os.dup(2), "w", encoding="utf-8")
_devnull = os.open(os.devnull, os.O_WRONLY)
os.dup2(_devnull, 2)
os.close(_devnull)


def _report_stage(stage, **fields):
    fields["stage"] = stage
    _report.write(json.dumps(fields))
    _report.flush()


def _describe(e):
    return "%s: %s" % (type(e).__name__, e)


def _run(path):
    try:
        with open(path, "r", encoding="utf-8") as f:
            source = f.read()
        namespace = {"__name__": "__main__"}
        exec(compile(source, path, "exec"), namespace)
    except BaseException as e:
        return _report_stage("load", error=_describe(e))
    main = namespace.get("main")
    if not callable(main):
        return _report_stage("entry")
    try:
        result = main()
    except BaseException as e:
        return _report_stage("call", error=_describe(e))
    try:
        encoded = json.dumps(result, allow_nan=False)
    except Exception:
        return _report_stage("encode")
    _report_stage("done", result=encoded)


_run(sys.argv[1])
"#;

/// Why a script did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFailure {
    /// Compiling or executing the top level of the script raised.
    Load(String),
    /// There is no callable `main`.
    MissingMain,
    /// `main()` raised.
    MainRaised(String),
    /// `main()` returned something that is not JSON.
    NotJson,
    /// Anything else: the interpreter did not start, crashed, or did not report.
    Unexpected(String),
}

impl ScriptFailure {
    /// The exit code of the runner for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScriptFailure::Load(_) => 80,
            ScriptFailure::MissingMain => 81,
            ScriptFailure::MainRaised(_) => 82,
            ScriptFailure::NotJson => 83,
            ScriptFailure::Unexpected(_) => 90,
        }
    }

    /// The error message reported to the caller.
    pub fn message(&self) -> String {
        match self {
            ScriptFailure::Load(e) => format!("Script execution error: {e}"),
            ScriptFailure::MissingMain => "No function main() found in script.".to_string(),
            ScriptFailure::MainRaised(e) => format!("main() raised: {e}"),
            ScriptFailure::NotJson => "main() must return a JSON value.".to_string(),
            ScriptFailure::Unexpected(e) => format!("Unexpected error: {e}"),
        }
    }
}

/// The result of running a script, with everything it printed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRun {
    /// The value returned by `main()`, or why there is none.
    pub result: Result<Value, ScriptFailure>,
    /// The captured standard output.
    pub stdout: String,
}

impl ScriptRun {
    /// The exit code of the runner for this run.
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(_) => EXIT_SUCCESS,
            Err(failure) => failure.exit_code(),
        }
    }

    /// Convert into the artifact format.
    pub fn into_outcome(self) -> RunnerOutcome {
        match self.result {
            Ok(result) => RunnerOutcome::Success {
                result,
                stdout: self.stdout,
            },
            Err(failure) => RunnerOutcome::Failure {
                error: failure.message(),
                stdout: self.stdout,
            },
        }
    }
}

/// The report sent by the bootstrap program.
#[derive(Debug, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
enum StageReport {
    Load { error: String },
    Entry,
    Call { error: String },
    Encode,
    Done { result: String },
}

impl StageReport {
    fn into_result(self) -> Result<Value, ScriptFailure> {
        match self {
            StageReport::Load { error } => Err(ScriptFailure::Load(error)),
            StageReport::Entry => Err(ScriptFailure::MissingMain),
            StageReport::Call { error } => Err(ScriptFailure::MainRaised(error)),
            StageReport::Encode => Err(ScriptFailure::NotJson),
            StageReport::Done { result } => {
                serde_json::from_str(&result).map_err(|_| ScriptFailure::NotJson)
            }
        }
    }
}

/// Run the script inside `workdir` with the provided interpreter.
pub fn run_script(interpreter: &Path, workdir: &Path) -> ScriptRun {
    let mut command = Command::new(interpreter);
    command
        .arg("-I")
        .arg("-c")
        .arg(BOOTSTRAP)
        .arg(SCRIPT_NAME)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("Starting interpreter {}", interpreter.display());
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ScriptRun {
                result: Err(ScriptFailure::Unexpected(format!(
                    "Cannot start the interpreter: {e}"
                ))),
                stdout: String::new(),
            }
        }
    };
    let stdout = PipeCapture::start(child.stdout.take(), STDOUT_LIMIT);
    let report = PipeCapture::start(child.stderr.take(), REPORT_LIMIT);
    let status = child.wait();
    let stdout = stdout.finish(DRAIN_TIMEOUT);
    let report = report.finish(DRAIN_TIMEOUT);
    let result = match status {
        Ok(status) => parse_report(&report, status).and_then(StageReport::into_result),
        Err(e) => Err(ScriptFailure::Unexpected(format!(
            "Failed to wait for the interpreter: {e}"
        ))),
    };
    ScriptRun { result, stdout }
}

/// Decode the report of the bootstrap, given how the interpreter exited.
fn parse_report(report: &str, status: ExitStatus) -> Result<StageReport, ScriptFailure> {
    let parsed: Result<StageReport, Error> = if report.is_empty() {
        Err(anyhow!("the interpreter exited with {status} without reporting"))
    } else {
        serde_json::from_str(report).with_context(|| {
            format!("the interpreter exited with {status} with an invalid report")
        })
    };
    parsed.map_err(|e| ScriptFailure::Unexpected(format!("{e:#}")))
}

/// Run the script inside `workdir`, store the outcome there and return the exit code.
pub fn main_runner(interpreter: &Path, workdir: &Path) -> i32 {
    let run = run_script(interpreter, workdir);
    let code = run.exit_code();
    if let Err(e) = write_atomic(workdir, &run.into_outcome()) {
        error!("Cannot write the outcome: {:?}", e);
        return EXIT_WRITE_FAILED;
    }
    code
}
