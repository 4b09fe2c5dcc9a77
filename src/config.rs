// Manager configuration: helper location, mount mode and stop policy.
// Loaded from an optional JSON file, then overridden from the command line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ManagerError, Result};
use crate::process::HelperCommand;

const CONFIG_DIR_NAME: &str = "rclone-mount-manager";
const CONFIG_FILE_NAME: &str = "config.json";

/// Whether mounting a remote replaces whatever is currently mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MountMode {
    /// One helper at a time; a new mount stops the current one first.
    #[default]
    Single,
    /// Independent mounts per remote.
    Multi,
}

/// What `stop` does once the grace period has lapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationPolicy {
    /// Force-kill only the tracked helper and its process group.
    KillProcessGroup,
    /// Force-kill every process named like the helper, system wide.
    KillAllByName,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        if cfg!(windows) {
            EscalationPolicy::KillAllByName
        } else {
            EscalationPolicy::KillProcessGroup
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub helper: String,
    pub helper_args: Vec<String>,
    pub process_name: Option<String>,
    pub mode: MountMode,
    pub grace_period_secs: u64,
    pub poll_interval_ms: u64,
    pub escalation: EscalationPolicy,
    pub sweep_after_stop: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            helper: "rclone".to_string(),
            helper_args: Vec::new(),
            process_name: None,
            mode: MountMode::default(),
            grace_period_secs: 5,
            poll_interval_ms: 500,
            escalation: EscalationPolicy::default(),
            sweep_after_stop: cfg!(windows),
        }
    }
}

impl ManagerConfig {
    /// Default location: `<config_dir>/rclone-mount-manager/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from an explicit path, or from the default path when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ManagerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.helper.trim().is_empty() {
            return Err(ManagerError::Configuration("helper must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ManagerError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        // Killing by name would take every other mount's helper with it.
        if self.mode == MountMode::Multi && self.escalation == EscalationPolicy::KillAllByName {
            return Err(ManagerError::Configuration(
                "mode \"multi\" requires escalation \"kill-process-group\"".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn helper_command(&self) -> HelperCommand {
        let command = HelperCommand::new(&self.helper).with_prefix_args(self.helper_args.clone());
        match &self.process_name {
            Some(name) => command.with_process_name(name),
            None => command,
        }
    }
}
