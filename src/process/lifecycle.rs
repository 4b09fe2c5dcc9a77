use std::io;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use super::handle::ProcessHandle;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
    Running,
    /// Exited, but the OS reported neither a code nor a signal.
    Unknown,
}

impl ExitStatus {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Signal(sig) => Some(*sig),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExitStatus::Running)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitStatus::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitStatus::Signal(sig);
            }
        }

        ExitStatus::Unknown
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(sig) => write!(f, "signal {}", sig),
            ExitStatus::Running => write!(f, "running"),
            ExitStatus::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Poll the helper until it exits or `timeout` elapses.
/// `Ok(None)` means it was still running at the deadline.
pub async fn wait_for_exit_timeout(
    handle: &mut ProcessHandle,
    timeout: Duration,
) -> Result<Option<ExitStatus>, io::Error> {
    let start = Instant::now();

    loop {
        match handle.try_status()? {
            ExitStatus::Running => {
                if start.elapsed() >= timeout {
                    debug!("pid {} still running after {:?}", handle.pid(), timeout);
                    return Ok(None);
                }
                sleep(EXIT_POLL_INTERVAL).await;
            }
            status => return Ok(Some(status)),
        }
    }
}
