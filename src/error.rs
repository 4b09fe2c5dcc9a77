use std::io;
use std::time::Duration;

use thiserror::Error;

/// Starting the mount helper failed; nothing was recorded.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Mount helper not found: {program}")]
    HelperNotFound { program: String },

    #[error("Permission denied launching {program}")]
    PermissionDenied { program: String },

    #[error("Invalid mount target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    pub(crate) fn from_spawn(program: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => LaunchError::HelperNotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
                program: program.to_string(),
            },
            _ => LaunchError::Spawn {
                program: program.to_string(),
                source,
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum MountError {
    #[error("Drive {0} is not mounted or was already unmounted")]
    NotMounted(String),

    #[error("Failed to mount {remote}: {source}")]
    LaunchFailed {
        remote: String,
        #[source]
        source: LaunchError,
    },
}

/// Non-fatal trouble while stopping a helper. The registry entry is
/// removed regardless.
#[derive(Error, Debug)]
pub enum StopWarning {
    #[error("{remote} (pid {pid}) did not exit within {grace:?}; escalated")]
    GraceExceeded {
        remote: String,
        pid: u32,
        grace: Duration,
    },

    #[error("Escalation for {remote} (pid {pid}) failed: {source}")]
    EscalationFailed {
        remote: String,
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Lost track of {remote} (pid {pid}): {source}")]
    Wait {
        remote: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl StopWarning {
    pub fn remote(&self) -> &str {
        match self {
            StopWarning::GraceExceeded { remote, .. }
            | StopWarning::EscalationFailed { remote, .. }
            | StopWarning::Wait { remote, .. } => remote,
        }
    }
}

#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("{program} command not found. Please install rclone first.")]
    HelperMissing { program: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("IO error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl EnumerationError {
    pub(crate) fn from_io(program: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            EnumerationError::HelperMissing {
                program: program.to_string(),
            }
        } else {
            EnumerationError::Io {
                program: program.to_string(),
                source,
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rclone is not installed or not in your PATH: {0}")]
    HelperUnavailable(#[from] EnumerationError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;
