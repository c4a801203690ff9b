use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::workspace::RUNNER_NAME;
use crate::SandboxConfig;

/// Where the workspace is mounted inside the sandbox.
pub const SANDBOX_WORKDIR: &str = "/sandbox";
/// Hostname of the sandbox.
pub const SANDBOX_HOSTNAME: &str = "pyjail";

/// The command line of an `nsjail` invocation running the runner on a workspace.
#[derive(Debug, Clone)]
pub struct NsjailCommand<'a> {
    config: &'a SandboxConfig,
    workspace: &'a Path,
    readable_dirs: Vec<PathBuf>,
}

impl<'a> NsjailCommand<'a> {
    /// Mount only the readable directories of the configuration that exist on this host.
    pub fn new(config: &'a SandboxConfig, workspace: &'a Path) -> NsjailCommand<'a> {
        let readable_dirs = config
            .readable_dirs
            .iter()
            .filter(|dir| dir.exists())
            .cloned()
            .collect();
        NsjailCommand {
            config,
            workspace,
            readable_dirs,
        }
    }

    /// Use exactly these read-only mounts.
    pub fn with_readable_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.readable_dirs = dirs;
        self
    }

    /// The arguments to pass to `nsjail`.
    pub fn args(&self) -> Vec<OsString> {
        let limits = &self.config.limits;
        let mut args: Vec<OsString> = vec!["--quiet".into()];
        let mut push = |arg: &str, value: String| {
            args.push(arg.into());
            args.push(value.into());
        };
        push("--mode", "o".into());
        push("--time_limit", self.config.time_limit_secs().to_string());
        push("--rlimit_as", limits.address_space_mib.to_string());
        push("--rlimit_fsize", limits.file_size_mib.to_string());
        push("--rlimit_nofile", limits.open_files.to_string());
        push("--user", self.config.uid.to_string());
        push("--group", self.config.gid.to_string());
        push("--hostname", SANDBOX_HOSTNAME.into());
        push("--cwd", SANDBOX_WORKDIR.into());
        push("--env", "LD_LIBRARY_PATH=/usr/local/lib".into());
        args.push("--iface_no_lo".into());
        args.push("--disable_proc".into());
        for dir in &self.readable_dirs {
            args.push("--bindmount_ro".into());
            args.push(dir.into());
        }
        let mut rw_mount = OsString::from(self.workspace);
        rw_mount.push(":");
        rw_mount.push(SANDBOX_WORKDIR);
        args.push("--bindmount".into());
        args.push(rw_mount);
        args.push("--".into());
        args.push(Path::new(SANDBOX_WORKDIR).join(RUNNER_NAME).into());
        args.push("--interpreter".into());
        args.push(self.config.interpreter_path.clone().into());
        args.push("--workdir".into());
        args.push(SANDBOX_WORKDIR.into());
        args
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn args_of(command: &NsjailCommand) -> Vec<String> {
        command
            .args()
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_full_command() {
        let config = SandboxConfig {
            interpreter_path: "/usr/bin/python3".into(),
            time_limit: Duration::from_secs(7),
            ..Default::default()
        };
        let command = NsjailCommand::new(&config, Path::new("/tmp/pyjail-abc"))
            .with_readable_dirs(vec!["/usr".into(), "/lib".into()]);
        let expected = [
            "--quiet",
            "--mode",
            "o",
            "--time_limit",
            "7",
            "--rlimit_as",
            "4096",
            "--rlimit_fsize",
            "10",
            "--rlimit_nofile",
            "128",
            "--user",
            "99999",
            "--group",
            "99999",
            "--hostname",
            "pyjail",
            "--cwd",
            "/sandbox",
            "--env",
            "LD_LIBRARY_PATH=/usr/local/lib",
            "--iface_no_lo",
            "--disable_proc",
            "--bindmount_ro",
            "/usr",
            "--bindmount_ro",
            "/lib",
            "--bindmount",
            "/tmp/pyjail-abc:/sandbox",
            "--",
            "/sandbox/pyjail-runner",
            "--interpreter",
            "/usr/bin/python3",
            "--workdir",
            "/sandbox",
        ];
        assert_eq!(args_of(&command), expected);
    }

    #[test]
    fn test_single_writable_mount() {
        let config = SandboxConfig::default();
        let args = args_of(&NsjailCommand::new(&config, Path::new("/w")));
        assert_eq!(args.iter().filter(|a| *a == "--bindmount").count(), 1);
        // only the directories that exist here are mounted
        let mounted: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "--bindmount_ro")
            .map(|w| w[1].clone())
            .collect();
        for dir in &mounted {
            assert!(Path::new(dir).exists(), "{dir} does not exist");
        }
    }

    #[test]
    fn test_custom_limits() {
        let mut config = SandboxConfig::default();
        config.limits.address_space_mib = 512;
        config.limits.open_files = 16;
        config.uid = 1234;
        let args = args_of(&NsjailCommand::new(&config, Path::new("/w")).with_readable_dirs(vec![]));
        let value_of = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(value_of("--rlimit_as"), "512");
        assert_eq!(value_of("--rlimit_nofile"), "16");
        assert_eq!(value_of("--user"), "1234");
    }
}
