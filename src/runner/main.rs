use std::path::PathBuf;

use clap::Parser;

use pyjail_exec::runner::main_runner;

/// Runs a script inside the sandbox and stores its outcome in the working directory.
///
/// Not meant to be started by hand: the launchers copy it inside each workspace.
#[derive(Parser, Debug)]
#[clap(name = "pyjail-runner", version)]
struct RunnerOpt {
    /// Path to the Python interpreter
    #[clap(long)]
    interpreter: PathBuf,

    /// Directory with the script, where the outcome is written
    #[clap(long, default_value = ".")]
    workdir: PathBuf,
}

fn main() {
    let opt = RunnerOpt::parse();
    // stderr ends up in the diagnostics of the sandbox, keep it quiet unless asked
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
            .format_timestamp_nanos()
            .init();
    }

    std::process::exit(main_runner(&opt.interpreter, &opt.workdir));
}
