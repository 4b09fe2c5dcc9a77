// What happens when a helper outlives its grace period, and the cleanup
// that follows every stop.

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command::HelperCommand;
use super::handle::ProcessHandle;
use crate::config::{EscalationPolicy, ManagerConfig};

#[async_trait]
pub trait Escalation: Send + Sync {
    /// Force the helper down. Called at most once per stop, only after the
    /// grace period lapsed.
    async fn escalate(&self, handle: &mut ProcessHandle) -> io::Result<()>;

    /// Runs after every stop, even when the helper had already exited,
    /// to catch children it left behind.
    async fn sweep(&self, handle: &mut ProcessHandle) -> io::Result<()>;
}

/// Narrow escalation: SIGKILL to the tracked helper's process group.
#[derive(Debug, Default, Clone)]
pub struct KillProcessGroup;

#[async_trait]
impl Escalation for KillProcessGroup {
    async fn escalate(&self, handle: &mut ProcessHandle) -> io::Result<()> {
        info!("Force killing helper for {} (pid {})", handle.remote(), handle.pid());
        handle.force_kill()
    }

    /// Only groups that still have members; an empty group's id is free
    /// for reuse by an unrelated process.
    async fn sweep(&self, handle: &mut ProcessHandle) -> io::Result<()> {
        if !handle.group_has_members() {
            return Ok(());
        }
        debug!("Sweeping leftovers of {} (group {})", handle.remote(), handle.pid());
        handle.force_kill()
    }
}

/// Coarse escalation: kill every process carrying the helper's executable
/// name, tracked or not. Safe only while a single mount is expected.
#[derive(Debug, Clone)]
pub struct KillAllByName {
    process_name: String,
    sweep_after_stop: bool,
}

impl KillAllByName {
    pub fn new(process_name: impl Into<String>, sweep_after_stop: bool) -> Self {
        Self {
            process_name: process_name.into(),
            sweep_after_stop,
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    fn command(&self) -> Command {
        if cfg!(windows) {
            let mut command = Command::new("taskkill");
            command.args(["/F", "/IM", self.process_name.as_str()]);
            command
        } else {
            let mut command = Command::new("pkill");
            command.args(["-KILL", "-x", self.process_name.as_str()]);
            command
        }
    }

    async fn kill_all(&self) -> io::Result<()> {
        warn!("Killing every process named {}", self.process_name);
        let status = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        // pkill exits 1 and taskkill 128 when nothing matched
        match status.code() {
            Some(0) | Some(1) | Some(128) => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("kill-all for {} exited with {}", self.process_name, status),
            )),
        }
    }
}

#[async_trait]
impl Escalation for KillAllByName {
    async fn escalate(&self, handle: &mut ProcessHandle) -> io::Result<()> {
        debug!("Escalating stop of {} (pid {})", handle.remote(), handle.pid());
        self.kill_all().await
    }

    async fn sweep(&self, _handle: &mut ProcessHandle) -> io::Result<()> {
        if self.sweep_after_stop {
            self.kill_all().await
        } else {
            Ok(())
        }
    }
}

pub fn from_config(config: &ManagerConfig, helper: &HelperCommand) -> Arc<dyn Escalation> {
    match config.escalation {
        EscalationPolicy::KillProcessGroup => Arc::new(KillProcessGroup),
        EscalationPolicy::KillAllByName => Arc::new(KillAllByName::new(
            helper.process_name(),
            config.sweep_after_stop,
        )),
    }
}
