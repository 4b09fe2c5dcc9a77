//! Which remotes are mounted, and where.
//!
//! `MountRegistry` owns every running helper through its [`TrackedMount`]
//! entries. It is constructed once by the binary and handed to the UI;
//! callers that share it across tasks wrap it in a mutex and hold the lock
//! for the whole of `mount`, which covers "stop current, then launch new".

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, MountMode};
use crate::error::{MountError, StopWarning};
use crate::process::{escalation, ExitStatus, OutputLine, ProcessHandle, ProcessSupervisor};
use crate::target::MountTarget;

/// Output lines kept when a helper dies on its own.
const EXIT_OUTPUT_LINES: usize = 5;

#[derive(Debug)]
pub struct TrackedMount {
    remote: String,
    target: MountTarget,
    handle: ProcessHandle,
}

impl TrackedMount {
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn target(&self) -> &MountTarget {
        &self.target
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.handle.started_at()
    }

    pub fn recent_output(&self, lines: usize) -> Vec<OutputLine> {
        self.handle.output().tail(lines)
    }
}

/// Result of taking one mount down.
#[derive(Debug)]
pub struct UnmountReport {
    pub remote: String,
    pub target: MountTarget,
    pub status: Option<ExitStatus>,
    pub warning: Option<StopWarning>,
}

#[derive(Debug, Default)]
pub struct MountReport {
    /// Mounts stopped to make room for this one.
    pub replaced: Vec<UnmountReport>,
}

impl MountReport {
    pub fn warnings(&self) -> impl Iterator<Item = &StopWarning> {
        self.replaced.iter().filter_map(|r| r.warning.as_ref())
    }
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub unmounted: Vec<String>,
    pub warnings: Vec<StopWarning>,
}

/// A helper that exited without being asked to.
#[derive(Debug)]
pub struct ExitedMount {
    pub remote: String,
    pub target: MountTarget,
    pub status: ExitStatus,
    pub last_output: Vec<OutputLine>,
}

pub struct MountRegistry {
    supervisor: ProcessSupervisor,
    mode: MountMode,
    mounts: HashMap<String, TrackedMount>,
    /// Insertion order of `mounts` keys.
    order: Vec<String>,
    current: Option<String>,
}

impl MountRegistry {
    pub fn new(supervisor: ProcessSupervisor, mode: MountMode) -> Self {
        Self {
            supervisor,
            mode,
            mounts: HashMap::new(),
            order: Vec::new(),
            current: None,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        let helper = config.helper_command();
        let escalation = escalation::from_config(config, &helper);
        let supervisor = ProcessSupervisor::new(helper)
            .with_escalation(escalation)
            .with_grace_period(config.grace_period());
        Self::new(supervisor, config.mode)
    }

    pub fn mode(&self) -> MountMode {
        self.mode
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// The mount a new `mount` call would replace in single-mount mode.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Start `remote` at `target`.
    ///
    /// Any existing helper for the same remote is stopped first, and in
    /// single-mount mode so is the current mount, whatever its remote.
    /// Stop trouble on the replaced mounts ends up in the report, not in `Err`.
    ///
    /// A bad target is rejected before anything is stopped. A helper that
    /// fails to spawn after the replacement leaves the replaced mount stopped.
    pub async fn mount(
        &mut self,
        remote: &str,
        target: MountTarget,
    ) -> Result<MountReport, MountError> {
        target.validate().map_err(|source| MountError::LaunchFailed {
            remote: remote.to_string(),
            source,
        })?;

        let mut report = MountReport::default();

        if self.mode == MountMode::Single {
            if let Some(current) = self.current.clone() {
                debug!("Replacing current mount {} with {}", current, remote);
                if let Some(replaced) = self.take_down(&current).await {
                    report.replaced.push(replaced);
                }
            }
        }
        if self.mounts.contains_key(remote) {
            if let Some(replaced) = self.take_down(remote).await {
                report.replaced.push(replaced);
            }
        }

        let handle = self
            .supervisor
            .launch(remote, &target)
            .map_err(|source| MountError::LaunchFailed {
                remote: remote.to_string(),
                source,
            })?;

        info!("Mounted {} to {} (pid {})", remote, target, handle.pid());
        self.mounts.insert(
            remote.to_string(),
            TrackedMount {
                remote: remote.to_string(),
                target,
                handle,
            },
        );
        self.order.push(remote.to_string());
        self.current = Some(remote.to_string());

        Ok(report)
    }

    /// Stop the helper for `remote` and forget it. The entry is removed
    /// even when the stop only partly succeeded.
    pub async fn unmount(&mut self, remote: &str) -> Result<UnmountReport, MountError> {
        self.take_down(remote)
            .await
            .ok_or_else(|| MountError::NotMounted(remote.to_string()))
    }

    /// Tracked and its helper still running. Probes the process every call.
    pub fn is_mounted(&mut self, remote: &str) -> bool {
        match self.mounts.get_mut(remote) {
            Some(mount) => mount.handle.is_alive(),
            None => false,
        }
    }

    pub fn is_tracked(&self, remote: &str) -> bool {
        self.mounts.contains_key(remote)
    }

    /// Tracked remotes in the order they were mounted.
    pub fn list_mounted(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, remote: &str) -> Option<&TrackedMount> {
        self.mounts.get(remote)
    }

    pub fn mounts(&self) -> impl Iterator<Item = &TrackedMount> {
        self.order.iter().filter_map(|remote| self.mounts.get(remote))
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Forget mounts whose helper exited on its own.
    pub fn reap_exited(&mut self) -> Vec<ExitedMount> {
        let mut exited = Vec::new();

        for remote in self.order.clone() {
            let Some(mount) = self.mounts.get_mut(&remote) else {
                continue;
            };
            let status = match mount.handle.try_status() {
                Ok(ExitStatus::Running) => continue,
                Ok(status) => status,
                Err(e) => {
                    warn!("Cannot probe helper for {}: {}", remote, e);
                    continue;
                }
            };

            if let Some(mount) = self.remove(&remote) {
                warn!("Helper for {} exited unexpectedly: {}", remote, status);
                exited.push(ExitedMount {
                    last_output: mount.recent_output(EXIT_OUTPUT_LINES),
                    remote: mount.remote,
                    target: mount.target,
                    status,
                });
            }
        }

        exited
    }

    /// Unmount everything, best effort. Used on the way out.
    pub async fn shutdown_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for remote in self.list_mounted() {
            match self.unmount(&remote).await {
                Ok(unmounted) => {
                    report.unmounted.push(unmounted.remote);
                    if let Some(warning) = unmounted.warning {
                        report.warnings.push(warning);
                    }
                }
                Err(e) => debug!("Skipping {} during shutdown: {}", remote, e),
            }
        }

        if !report.unmounted.is_empty() {
            info!(
                "Shutdown unmounted {} drive(s), {} warning(s)",
                report.unmounted.len(),
                report.warnings.len()
            );
        }
        report
    }

    /// The entry stays tracked until its stop has finished, so a caller that
    /// is cancelled mid-stop leaves it for `shutdown_all`.
    async fn take_down(&mut self, remote: &str) -> Option<UnmountReport> {
        let grace = self.supervisor.grace_period();
        let tracked = self.mounts.get_mut(remote)?;
        let outcome = self.supervisor.stop(&mut tracked.handle, grace).await;

        let mount = self.remove(remote)?;
        let (status, warning) = match outcome {
            Ok(status) => (Some(status), None),
            Err(warning) => (None, Some(warning)),
        };

        Some(UnmountReport {
            remote: mount.remote,
            target: mount.target,
            status,
            warning,
        })
    }

    fn remove(&mut self, remote: &str) -> Option<TrackedMount> {
        let mount = self.mounts.remove(remote)?;
        self.order.retain(|r| r != remote);
        if self.current.as_deref() == Some(remote) {
            self.current = None;
        }
        Some(mount)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::supervisor::tests::{CountingEscalation, FakeHelper};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry(helper: &FakeHelper, mode: MountMode) -> (MountRegistry, Arc<CountingEscalation>) {
        let counter = Arc::new(CountingEscalation::default());
        let supervisor = ProcessSupervisor::new(helper.command())
            .with_escalation(counter.clone())
            .with_grace_period(Duration::from_millis(500));
        (MountRegistry::new(supervisor, mode), counter)
    }

    async fn wait_until_dead(registry: &mut MountRegistry, remote: &str) {
        for _ in 0..250 {
            if !registry.is_mounted(remote) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never exited", remote);
    }

    #[tokio::test]
    async fn test_mount_replaces_current() {
        let helper = FakeHelper::new();
        let (mut registry, counter) = registry(&helper, MountMode::Single);

        registry.mount("driveA", helper.target("a")).await.unwrap();
        assert!(registry.is_mounted("driveA"));
        assert_eq!(registry.current(), Some("driveA"));

        let report = registry.mount("driveB", helper.target("b")).await.unwrap();
        assert_eq!(report.replaced.len(), 1);
        assert_eq!(report.replaced[0].remote, "driveA");
        assert!(report.warnings().next().is_none());

        assert!(!registry.is_mounted("driveA"));
        assert!(registry.is_mounted("driveB"));
        assert_eq!(registry.current(), Some("driveB"));
        assert_eq!(registry.list_mounted(), vec!["driveB".to_string()]);
        assert_eq!(counter.escalations.load(Ordering::SeqCst), 0);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_single_current_over_many_mounts() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        for (i, remote) in ["one", "two", "three", "two"].iter().enumerate() {
            registry.mount(remote, helper.target(&format!("m{}", i))).await.unwrap();
            assert_eq!(registry.len(), 1);
            assert_eq!(registry.current(), Some(*remote));
        }

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_multi_mode_keeps_mounts_in_order() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Multi);

        registry.mount("zeta", helper.target("z")).await.unwrap();
        registry.mount("alpha", helper.target("a")).await.unwrap();
        assert!(registry.is_mounted("zeta"));
        assert!(registry.is_mounted("alpha"));
        assert_eq!(registry.list_mounted(), vec!["zeta", "alpha"]);
        assert_eq!(registry.current(), Some("alpha"));

        // Remounting the same remote replaces only that one.
        let report = registry.mount("zeta", helper.target("z2")).await.unwrap();
        assert_eq!(report.replaced.len(), 1);
        assert_eq!(registry.list_mounted(), vec!["alpha", "zeta"]);
        assert_eq!(
            registry.get("zeta").unwrap().target(),
            &MountTarget::directory(helper.path().join("z2"))
        );

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_unmount_twice() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        registry.mount("gdrive", helper.target("g")).await.unwrap();

        let report = registry.unmount("gdrive").await.unwrap();
        assert_eq!(report.remote, "gdrive");
        assert!(report.warning.is_none());
        assert!(report.status.is_some());
        assert_eq!(registry.current(), None);

        let second = registry.unmount("gdrive").await;
        assert!(matches!(second, Err(MountError::NotMounted(ref r)) if r == "gdrive"));
    }

    #[tokio::test]
    async fn test_unmount_ghost_on_empty_registry() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        let result = registry.unmount("ghost").await;
        assert!(matches!(result, Err(MountError::NotMounted(_))));
        assert!(registry.is_empty());
        assert_eq!(registry.current(), None);
    }

    #[tokio::test]
    async fn test_exited_helper_is_not_mounted() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        registry.mount("flaky", helper.target("f")).await.unwrap();
        wait_until_dead(&mut registry, "flaky").await;

        assert!(!registry.is_mounted("flaky"));
        assert!(registry.is_tracked("flaky"));

        let exited = registry.reap_exited();
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].remote, "flaky");
        assert_eq!(exited[0].status, ExitStatus::Code(3));
        assert!(registry.is_empty());
        assert_eq!(registry.current(), None);
    }

    #[tokio::test]
    async fn test_externally_killed_helper_is_not_mounted() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        registry.mount("gdrive", helper.target("g")).await.unwrap();
        let pid = registry.get("gdrive").unwrap().pid();
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();

        wait_until_dead(&mut registry, "gdrive").await;
        assert!(!registry.is_mounted("gdrive"));

        // Unmounting a dead helper still cleans up the entry.
        let report = registry.unmount("gdrive").await.unwrap();
        assert_eq!(report.status.and_then(|s| s.signal()), Some(9));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_launch_records_nothing() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        let missing = MountTarget::directory(helper.path().join("missing"));
        let result = registry.mount("gdrive", missing).await;
        assert!(matches!(result, Err(MountError::LaunchFailed { .. })));
        assert!(registry.is_empty());
        assert!(!registry.is_mounted("gdrive"));
        assert_eq!(registry.current(), None);
    }

    #[tokio::test]
    async fn test_bad_target_keeps_current_mount() {
        let helper = FakeHelper::new();
        let (mut registry, _) = registry(&helper, MountMode::Single);

        registry.mount("driveA", helper.target("a")).await.unwrap();
        let pid = registry.get("driveA").unwrap().pid();

        let missing = MountTarget::directory(helper.path().join("missing"));
        let result = registry.mount("driveB", missing).await;
        assert!(matches!(
            result,
            Err(MountError::LaunchFailed {
                source: crate::error::LaunchError::InvalidTarget { .. },
                ..
            })
        ));

        assert!(registry.is_mounted("driveA"));
        assert_eq!(registry.get("driveA").unwrap().pid(), pid);
        assert_eq!(registry.current(), Some("driveA"));
        assert_eq!(registry.list_mounted(), vec!["driveA"]);

        registry.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_vanished_helper_leaves_replaced_mount_stopped() {
        let helper = FakeHelper::new();
        let (command, link) = helper.removable_command();
        let supervisor = ProcessSupervisor::new(command).with_grace_period(Duration::from_millis(500));
        let mut registry = MountRegistry::new(supervisor, MountMode::Single);

        registry.mount("driveA", helper.target("a")).await.unwrap();
        assert!(registry.is_mounted("driveA"));

        std::fs::remove_file(&link).unwrap();
        let result = registry.mount("driveB", helper.target("b")).await;
        assert!(matches!(
            result,
            Err(MountError::LaunchFailed {
                source: crate::error::LaunchError::HelperNotFound { .. },
                ..
            })
        ));

        assert!(!registry.is_tracked("driveA"));
        assert!(!registry.is_tracked("driveB"));
        assert!(registry.is_empty());
        assert_eq!(registry.current(), None);
    }

    #[tokio::test]
    async fn test_cancelled_unmount_is_finished_by_shutdown() {
        let helper = FakeHelper::new();
        let (registry, counter) = registry(&helper, MountMode::Single);
        let registry = Arc::new(tokio::sync::Mutex::new(registry));

        registry.lock().await.mount("stubborn", helper.target("s")).await.unwrap();
        let pid = registry.lock().await.get("stubborn").unwrap().pid();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Cancel while the stop is still inside its grace period.
        let task = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.lock().await.unmount("stubborn").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let mut registry = registry.lock().await;
        assert!(registry.is_tracked("stubborn"));

        let report = registry.shutdown_all().await;
        assert_eq!(report.unmounted, vec!["stubborn"]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(counter.escalations.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        let group = nix::unistd::Pid::from_raw(pid as i32);
        assert!(nix::sys::signal::killpg(group, None).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_all_is_best_effort() {
        let helper = FakeHelper::new();
        let (mut registry, counter) = registry(&helper, MountMode::Multi);

        registry.mount("first", helper.target("1")).await.unwrap();
        registry.mount("stubborn", helper.target("2")).await.unwrap();
        registry.mount("third", helper.target("3")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = registry.shutdown_all().await;
        assert_eq!(report.unmounted, vec!["first", "stubborn", "third"]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].remote(), "stubborn");
        assert_eq!(counter.escalations.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.list_mounted().is_empty());
    }

    #[tokio::test]
    async fn test_replacing_stubborn_mount_reports_warning() {
        let helper = FakeHelper::new();
        let (mut registry, counter) = registry(&helper, MountMode::Single);

        registry.mount("stubborn", helper.target("s")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let report = registry.mount("gdrive", helper.target("g")).await.unwrap();
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(counter.escalations.load(Ordering::SeqCst), 1);
        assert!(registry.is_mounted("gdrive"));
        assert!(!registry.is_tracked("stubborn"));

        registry.shutdown_all().await;
    }
}
