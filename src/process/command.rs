use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::target::MountTarget;

/// Fixed flags passed to every `mount` invocation. Not user configurable.
pub const MOUNT_FLAGS: &[(&str, &str)] = &[
    ("--vfs-cache-mode", "full"),
    ("--vfs-cache-max-size", "10G"),
    ("--vfs-cache-max-age", "1h"),
    ("--buffer-size", "64M"),
    ("--dir-cache-time", "72h"),
    ("--poll-interval", "15s"),
    ("--timeout", "1m"),
    ("--log-level", "INFO"),
];

/// How to invoke the external helper.
///
/// `prefix_args` go between the program and the subcommand, which lets a
/// wrapper (`sudo`, `flatpak run`, a shell script) stand in for the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    program: String,
    prefix_args: Vec<String>,
    process_name: Option<String>,
}

impl HelperCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            process_name: None,
        }
    }

    pub fn with_prefix_args(mut self, args: Vec<String>) -> Self {
        self.prefix_args = args;
        self
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Executable name as the OS process table reports it.
    pub fn process_name(&self) -> String {
        if let Some(name) = &self.process_name {
            return name.clone();
        }

        let path = Path::new(&self.program);
        if cfg!(windows) {
            let file = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.program.clone());
            if path.extension().is_some() {
                file
            } else {
                format!("{}.exe", file)
            }
        } else {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.program.clone())
        }
    }

    /// `<helper> mount <remote> <target> <fixed flags>`
    pub fn mount_args(&self, remote: &str, target: &MountTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();
        args.push("mount".into());
        args.push(remote.into());
        args.push(target.as_arg());
        for &(flag, value) in MOUNT_FLAGS {
            args.push(flag.into());
            args.push(value.into());
        }
        args
    }

    pub fn mount(&self, remote: &str, target: &MountTarget) -> Command {
        let mut command = std::process::Command::new(&self.program);
        command
            .args(self.mount_args(remote, target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so that stop can reach detached children and
        // a terminal Ctrl+C does not hit the helper before we do.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Command::from(command)
    }

    pub fn list_remotes(&self) -> Command {
        self.simple(&["listremotes"])
    }

    pub fn version(&self) -> Command {
        self.simple(&["--version"])
    }

    fn simple(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}
