use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::{debug, info, warn};

use super::command::HelperCommand;
use super::lifecycle::ExitStatus;
use crate::error::LaunchError;
use crate::target::MountTarget;

/// Lines of helper output kept per mount.
pub const OUTPUT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: Stream,
    pub line: String,
}

/// Bounded tail of everything the helper printed.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    lines: Arc<Mutex<VecDeque<OutputLine>>>,
}

impl OutputCapture {
    fn push(&self, stream: Stream, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == OUTPUT_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(OutputLine { stream, line });
    }

    pub fn snapshot(&self) -> Vec<OutputLine> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<OutputLine> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    fn drain_from<R>(&self, reader: R, stream: Stream, pid: u32)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!("[pid {} {:?}] {}", pid, stream, line);
                        capture.push(stream, line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Stopped reading {:?} of pid {}: {}", stream, pid, e);
                        break;
                    }
                }
            }
        });
    }
}

/// A running mount helper. Owned by exactly one tracked mount.
pub struct ProcessHandle {
    remote: String,
    target: MountTarget,
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    output: OutputCapture,
    exit_status: Option<ExitStatus>,
    stop_requested: bool,
}

impl ProcessHandle {
    /// Spawn the helper and start draining its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        helper: &HelperCommand,
        remote: &str,
        target: &MountTarget,
    ) -> Result<Self, LaunchError> {
        let mut child = helper
            .mount(remote, target)
            .spawn()
            .map_err(|e| LaunchError::from_spawn(helper.program(), e))?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(LaunchError::Spawn {
                    program: helper.program().to_string(),
                    source: io::Error::new(
                        io::ErrorKind::Other,
                        "helper exited before it could be tracked",
                    ),
                })
            }
        };

        let output = OutputCapture::default();
        if let Some(stdout) = child.stdout.take() {
            output.drain_from(stdout, Stream::Stdout, pid);
        }
        if let Some(stderr) = child.stderr.take() {
            output.drain_from(stderr, Stream::Stderr, pid);
        }

        info!("Launched {} for {} at {} (pid {})", helper.program(), remote, target, pid);

        Ok(Self {
            remote: remote.to_string(),
            target: target.clone(),
            child,
            pid,
            started_at: Utc::now(),
            output,
            exit_status: None,
            stop_requested: false,
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn target(&self) -> &MountTarget {
        &self.target
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn output(&self) -> &OutputCapture {
        &self.output
    }

    /// Non-blocking status check. Reaps the helper once it has exited.
    pub fn try_status(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = &self.exit_status {
            return Ok(status.clone());
        }

        match self.child.try_wait()? {
            None => Ok(ExitStatus::Running),
            Some(status) => {
                let status = ExitStatus::from(status);
                info!("Helper for {} (pid {}) exited: {}", self.remote, self.pid, status);
                self.exit_status = Some(status.clone());
                Ok(status)
            }
        }
    }

    /// Never blocks; an error while probing counts as not alive.
    pub fn is_alive(&mut self) -> bool {
        match self.try_status() {
            Ok(status) => status.is_running(),
            Err(e) => {
                warn!("Cannot probe helper for {} (pid {}): {}", self.remote, self.pid, e);
                false
            }
        }
    }

    /// Ask the helper to exit (SIGTERM to its process group).
    #[cfg(unix)]
    pub fn request_stop(&mut self) -> io::Result<()> {
        use nix::sys::signal::Signal;
        self.stop_requested = true;
        self.signal_group(Signal::SIGTERM)
    }

    /// Windows has no polite request; terminate the tracked process.
    #[cfg(not(unix))]
    pub fn request_stop(&mut self) -> io::Result<()> {
        self.stop_requested = true;
        self.child.start_kill()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Whether anything is left in the helper's process group. Once the
    /// group is empty its id may be handed out again, so it must not be
    /// signalled any more.
    #[cfg(unix)]
    pub fn group_has_members(&self) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        match i32::try_from(self.pid).ok().filter(|pid| *pid > 1) {
            Some(pgid) => killpg(Pid::from_raw(pgid), None).is_ok(),
            None => false,
        }
    }

    #[cfg(not(unix))]
    pub fn group_has_members(&self) -> bool {
        false
    }

    /// Kill the helper and anything left in its process group.
    #[cfg(unix)]
    pub fn force_kill(&mut self) -> io::Result<()> {
        use nix::sys::signal::Signal;
        self.signal_group(Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    pub fn force_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let pgid = i32::try_from(self.pid)
            .ok()
            .filter(|pid| *pid > 1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid helper pid"))?;

        debug!("Sending {:?} to process group {}", signal, pgid);
        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("remote", &self.remote)
            .field("target", &self.target)
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.is_alive() {
            return;
        }

        // A stop that was interrupted does not get a second polite request.
        let result = if self.stop_requested {
            warn!("Dropping helper for {} mid-stop, killing pid {}", self.remote, self.pid);
            self.force_kill()
        } else {
            debug!("Dropping live helper for {}, pid: {}", self.remote, self.pid);
            self.request_stop()
        };
        if let Err(e) = result {
            warn!("Failed to stop helper pid {}: {}", self.pid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_capture_is_bounded() {
        let capture = OutputCapture::default();
        for i in 0..(OUTPUT_CAPACITY + 10) {
            capture.push(Stream::Stderr, format!("line {}", i));
        }

        let lines = capture.snapshot();
        assert_eq!(lines.len(), OUTPUT_CAPACITY);
        assert_eq!(lines[0].line, "line 10");

        let tail = capture.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].line, format!("line {}", OUTPUT_CAPACITY + 9));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_handle_mid_stop_kills_it() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("stubborn.sh");
        std::fs::write(&script, "trap '' TERM\nexec sleep 30\n").unwrap();
        let helper = HelperCommand::new("/bin/sh")
            .with_prefix_args(vec![script.to_string_lossy().into_owned()]);
        let target = MountTarget::directory(dir.path());

        let mut handle = ProcessHandle::spawn(&helper, "stubborn", &target).unwrap();
        let pid = handle.pid();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        handle.request_stop().unwrap();
        assert!(handle.stop_requested());
        assert!(handle.is_alive());
        drop(handle);

        // SIGKILL is not trappable: the helper is a zombie or gone.
        let stat = format!("/proc/{}/stat", pid);
        let mut dead = false;
        for _ in 0..250 {
            dead = match std::fs::read_to_string(&stat) {
                Ok(line) => line
                    .rsplit(')')
                    .next()
                    .map_or(false, |rest| rest.trim_start().starts_with('Z')),
                Err(_) => true,
            };
            if dead {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(dead, "helper survived being dropped mid-stop");
    }

    #[tokio::test]
    async fn test_spawn_missing_helper() {
        let helper = HelperCommand::new("/nonexistent/rclone");
        let target = MountTarget::directory("/tmp");
        let result = ProcessHandle::spawn(&helper, "gdrive", &target);
        assert!(matches!(result, Err(LaunchError::HelperNotFound { .. })));
    }
}
