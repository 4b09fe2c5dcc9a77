// Launch, probe and stop mount helpers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::command::HelperCommand;
use super::escalation::{Escalation, KillProcessGroup};
use super::handle::ProcessHandle;
use super::lifecycle::{wait_for_exit_timeout, ExitStatus};
use crate::error::{LaunchError, StopWarning};
use crate::target::MountTarget;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Extra time given to a force-killed helper to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ProcessSupervisor {
    helper: HelperCommand,
    escalation: Arc<dyn Escalation>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(helper: HelperCommand) -> Self {
        Self {
            helper,
            escalation: Arc::new(KillProcessGroup),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn Escalation>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn helper(&self) -> &HelperCommand {
        &self.helper
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn launch(&self, remote: &str, target: &MountTarget) -> Result<ProcessHandle, LaunchError> {
        target.validate()?;
        ProcessHandle::spawn(&self.helper, remote, target)
    }

    pub fn is_alive(&self, handle: &mut ProcessHandle) -> bool {
        handle.is_alive()
    }

    /// Stop a helper: polite request, wait up to `grace_period`, then one
    /// escalation. The escalation policy's sweep always runs last.
    ///
    /// `Err` carries a warning; the helper is as stopped as it is going to get.
    pub async fn stop(
        &self,
        handle: &mut ProcessHandle,
        grace_period: Duration,
    ) -> Result<ExitStatus, StopWarning> {
        let outcome = self.terminate(handle, grace_period).await;

        if let Err(e) = self.escalation.sweep(handle).await {
            warn!("Cleanup after stopping {} failed: {}", handle.remote(), e);
        }

        match &outcome {
            Ok(status) => info!("Stopped {} (pid {}): {}", handle.remote(), handle.pid(), status),
            Err(warning) => warn!("{}", warning),
        }
        outcome
    }

    async fn terminate(
        &self,
        handle: &mut ProcessHandle,
        grace_period: Duration,
    ) -> Result<ExitStatus, StopWarning> {
        let status = handle.try_status().map_err(|source| self.lost(handle, source))?;
        if !status.is_running() {
            debug!("Helper for {} had already exited: {}", handle.remote(), status);
            return Ok(status);
        }

        if let Err(e) = handle.request_stop() {
            warn!("Stop request to {} (pid {}) failed: {}", handle.remote(), handle.pid(), e);
        }

        match wait_for_exit_timeout(handle, grace_period).await {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(source) => return Err(self.lost(handle, source)),
        }

        if let Err(source) = self.escalation.escalate(handle).await {
            return Err(StopWarning::EscalationFailed {
                remote: handle.remote().to_string(),
                pid: handle.pid(),
                source,
            });
        }

        match wait_for_exit_timeout(handle, REAP_TIMEOUT).await {
            Ok(Some(status)) => debug!("Escalated helper {} exited: {}", handle.pid(), status),
            Ok(None) => warn!("Helper {} survived escalation", handle.pid()),
            Err(e) => debug!("Cannot reap helper {}: {}", handle.pid(), e),
        }

        Err(StopWarning::GraceExceeded {
            remote: handle.remote().to_string(),
            pid: handle.pid(),
            grace: grace_period,
        })
    }

    fn lost(&self, handle: &ProcessHandle, source: std::io::Error) -> StopWarning {
        StopWarning::Wait {
            remote: handle.remote().to_string(),
            pid: handle.pid(),
            source,
        }
    }
}
