// Remote enumeration and helper availability, both by shelling out to the helper.

use tracing::{debug, warn};

use crate::error::{EnumerationError, Result};
use crate::process::HelperCommand;

/// Outcome of `listremotes`. A failure still yields a (empty) list.
#[derive(Debug, Default)]
pub struct RemoteListing {
    pub remotes: Vec<String>,
    pub error: Option<EnumerationError>,
}

impl RemoteListing {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ask the helper for its configured remotes.
pub async fn list_remotes(helper: &HelperCommand) -> RemoteListing {
    match run(helper, helper.list_remotes()).await {
        Ok(stdout) => {
            let remotes = parse_remotes(&stdout);
            debug!("Found {} remote(s)", remotes.len());
            RemoteListing {
                remotes,
                error: None,
            }
        }
        Err(e) => {
            warn!("Error retrieving rclone remotes: {}", e);
            RemoteListing {
                remotes: Vec::new(),
                error: Some(e),
            }
        }
    }
}

/// One remote per line, trailing colon removed.
pub fn parse_remotes(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .map(|line| line.strip_suffix(':').unwrap_or(line))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// First line of `<helper> --version`. Any failure means the helper is
/// unusable and surfaces as `ManagerError::HelperUnavailable`.
pub async fn helper_version(helper: &HelperCommand) -> Result<String> {
    let stdout = run(helper, helper.version()).await?;
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

async fn run(
    helper: &HelperCommand,
    mut command: tokio::process::Command,
) -> std::result::Result<String, EnumerationError> {
    let output = command
        .output()
        .await
        .map_err(|e| EnumerationError::from_io(helper.program(), e))?;

    if !output.status.success() {
        return Err(EnumerationError::Failed {
            program: helper.program().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
