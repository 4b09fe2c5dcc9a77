// Drive monitor: watch a mount until it goes away or the user leaves.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::console::Console;
use crate::error::MountError;
use crate::registry::{MountRegistry, UnmountReport};
use crate::target::MountTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Mounted,
    /// The registry is busy, typically stopping a helper.
    Stopping,
    Gone,
}

/// Probe without waiting on the registry lock.
pub fn probe(registry: &Mutex<MountRegistry>, remote: &str) -> DriveState {
    match registry.try_lock() {
        Ok(mut registry) => {
            if registry.is_mounted(remote) {
                DriveState::Mounted
            } else {
                DriveState::Gone
            }
        }
        Err(_) => DriveState::Stopping,
    }
}

pub async fn monitor<R, W>(
    console: &mut Console<R, W>,
    registry: &Arc<Mutex<MountRegistry>>,
    remote: &str,
    target: &MountTarget,
    poll_interval: Duration,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    console.say("--- Drive Monitor ---")?;
    console.say(format!("{} is mounted to {}", remote, target))?;
    console.say("Enter 'q' to unmount | Enter 'b' to return to menu")?;

    let mut ticker = tokio::time::interval(poll_interval);
    let mut unmounting: Option<JoinHandle<Result<UnmountReport, MountError>>> = None;
    let mut last_state = DriveState::Mounted;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(task) = unmounting.take() {
                    if task.is_finished() {
                        return report_unmount(console, remote, task).await;
                    }
                    unmounting = Some(task);
                    continue;
                }

                let state = probe(registry, remote);
                if state != last_state {
                    debug!("{} is now {:?}", remote, state);
                    match state {
                        DriveState::Stopping => console.say(format!("{} is stopping...", remote))?,
                        DriveState::Mounted => console.say(format!("{} is mounted to {}", remote, target))?,
                        DriveState::Gone => {
                            console.say(format!("{} is no longer mounted.", remote))?;
                            return Ok(());
                        }
                    }
                    last_state = state;
                }
            }
            line = console.read_line(), if unmounting.is_none() => {
                match line?.to_lowercase().as_str() {
                    "q" => {
                        console.say(format!("Unmounting {}...", remote))?;
                        let registry = Arc::clone(registry);
                        let remote = remote.to_string();
                        unmounting = Some(tokio::spawn(async move {
                            registry.lock().await.unmount(&remote).await
                        }));
                    }
                    "b" => return Ok(()),
                    _ => console.say("Enter 'q' to unmount | Enter 'b' to return to menu")?,
                }
            }
        }
    }
}

async fn report_unmount<R, W>(
    console: &mut Console<R, W>,
    remote: &str,
    task: JoinHandle<Result<UnmountReport, MountError>>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    match task.await {
        Ok(Ok(report)) => {
            if let Some(warning) = report.warning {
                console.say(format!("Warning: {}", warning))?;
            }
            console.say(format!("{} successfully unmounted.", remote))
        }
        Ok(Err(e)) => console.say(format!("Warning: {}", e)),
        Err(e) => console.say(format!("Error unmounting drive: {}", e)),
    }
}
