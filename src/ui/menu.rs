use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncBufRead;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::console::Console;
use super::monitor::monitor;
use super::table;
use crate::process::HelperCommand;
use crate::registry::MountRegistry;
use crate::remotes;
use crate::target::{self, MountTarget};

/// Where a submenu wants to go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Back,
    Quit,
}

pub struct MountManagerUi<R, W> {
    console: Console<R, W>,
    registry: Arc<Mutex<MountRegistry>>,
    helper: HelperCommand,
    poll_interval: Duration,
}

impl<R, W> MountManagerUi<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        console: Console<R, W>,
        registry: Arc<Mutex<MountRegistry>>,
        helper: HelperCommand,
        poll_interval: Duration,
    ) -> Self {
        Self {
            console,
            registry,
            helper,
            poll_interval,
        }
    }

    pub fn console(&self) -> &Console<R, W> {
        &self.console
    }

    /// Main menu loop. Returns when the user quits; the caller owns cleanup.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            self.console.header()?;
            self.report_exited().await?;

            self.console.say("  [1] Mount a cloud drive")?;
            self.console.say("  [2] Unmount a cloud drive")?;
            self.console.say("  [3] View mounted drives")?;
            self.console.say("  [q] Exit program")?;

            let choice = self
                .console
                .choose("\nEnter your choice", &choices(0, &["1", "2", "3", "q"]))
                .await?;

            let flow = match choice.as_str() {
                "1" => self.mount_menu().await?,
                "2" => self.unmount_menu().await?,
                "3" => self.view_mounted().await?,
                _ => Flow::Quit,
            };

            if flow == Flow::Quit {
                info!("User requested exit");
                return Ok(());
            }
        }
    }

    async fn mount_menu(&mut self) -> io::Result<Flow> {
        loop {
            self.console.header()?;

            let listing = remotes::list_remotes(&self.helper).await;
            if let Some(error) = &listing.error {
                self.console.say(format!("Error retrieving rclone remotes: {}", error))?;
            }

            if listing.remotes.is_empty() {
                self.console.say("No remotes found. Please configure rclone first.")?;
                return if self
                    .console
                    .confirm("Would you like to return to the main menu?")
                    .await?
                {
                    Ok(Flow::Back)
                } else {
                    Ok(Flow::Quit)
                };
            }

            let rows = {
                let mut registry = self.registry.lock().await;
                listing
                    .remotes
                    .iter()
                    .enumerate()
                    .map(|(i, remote)| {
                        let status = if registry.is_mounted(remote) {
                            "MOUNTED"
                        } else {
                            "Not Mounted"
                        };
                        vec![(i + 1).to_string(), remote.clone(), status.to_string()]
                    })
                    .collect::<Vec<_>>()
            };
            self.console.say(table::render(
                "Available Cloud Drives",
                &["Number", "Remote Name", "Status"],
                &rows,
            )?)?;

            let count = listing.remotes.len();
            self.console.say("Options:")?;
            self.console.say(format!("  1-{}: Select a drive to mount", count))?;
            self.console.say("  b: Back to main menu")?;
            self.console.say("  q: Quit")?;

            let choice = self
                .console
                .choose("\nEnter your choice", &choices(count, &["b", "q"]))
                .await?;

            match choice.as_str() {
                "b" => return Ok(Flow::Back),
                "q" => return Ok(Flow::Quit),
                index => {
                    if let Some(remote) = selected(index, &listing.remotes) {
                        self.handle_mount(&remote).await?;
                    }
                }
            }
        }
    }

    async fn handle_mount(&mut self, remote: &str) -> io::Result<()> {
        self.console.header()?;

        let already_mounted = self.registry.lock().await.is_mounted(remote);
        if already_mounted {
            self.console.say(format!("{} is already mounted.", remote))?;
            if self.console.confirm("Would you like to unmount it?").await? {
                self.unmount(remote).await?;
            }
            return Ok(());
        }

        let Some(target) = self.choose_target().await? else {
            return Ok(());
        };

        self.console.say(format!("Mounting {} to {}...", remote, target))?;
        let result = self.registry.lock().await.mount(remote, target.clone()).await;

        match result {
            Ok(report) => {
                for replaced in &report.replaced {
                    self.console.say(format!("Stopped previous mount {}", replaced.remote))?;
                }
                for warning in report.warnings() {
                    self.console.say(format!("Warning: {}", warning))?;
                }
                self.console
                    .say(format!("Successfully mounted {} to {}", remote, target))?;
                monitor(
                    &mut self.console,
                    &self.registry,
                    remote,
                    &target,
                    self.poll_interval,
                )
                .await
            }
            Err(e) => {
                self.console.say(format!("Failed to mount the drive: {}", e))?;
                Ok(())
            }
        }
    }

    /// Drive letter on Windows, directory elsewhere. `None` when nothing usable.
    async fn choose_target(&mut self) -> io::Result<Option<MountTarget>> {
        if cfg!(windows) {
            let letters: Vec<String> = target::available_drive_letters()
                .into_iter()
                .map(String::from)
                .collect();
            if letters.is_empty() {
                self.console.say("No drive letters available for mounting.")?;
                return Ok(None);
            }
            let letter = self
                .console
                .choose("Select drive letter to use for mounting", &letters)
                .await?;
            return Ok(MountTarget::drive(&letter));
        }

        let path = loop {
            let path = self.console.ask("Enter mount point (directory path)").await?;
            if !path.is_empty() {
                break path;
            }
        };

        let target = MountTarget::directory(path);
        if let Err(e) = target.prepare() {
            self.console
                .say(format!("Cannot create mount point {}: {}", target, e))?;
            return Ok(None);
        }
        Ok(Some(target))
    }

    async fn unmount_menu(&mut self) -> io::Result<Flow> {
        self.console.header()?;

        let rows = self.mounted_rows().await;
        if rows.is_empty() {
            self.console.say("No drives are currently mounted.")?;
            return Ok(Flow::Back);
        }

        let numbered: Vec<Vec<String>> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| vec![(i + 1).to_string(), row[0].clone(), row[1].clone()])
            .collect();
        self.console.say(table::render(
            "Currently Mounted Drives",
            &["Number", "Remote Name", "Mount Point"],
            &numbered,
        )?)?;

        self.console.say("Options:")?;
        self.console
            .say(format!("  1-{}: Select a drive to unmount", rows.len()))?;
        self.console.say("  b: Back to main menu")?;

        let choice = self
            .console
            .choose("\nEnter your choice", &choices(rows.len(), &["b"]))
            .await?;

        let remotes: Vec<String> = rows.into_iter().map(|row| row[0].clone()).collect();
        if let Some(remote) = selected(&choice, &remotes) {
            self.unmount(&remote).await?;
        }
        Ok(Flow::Back)
    }

    async fn view_mounted(&mut self) -> io::Result<Flow> {
        self.console.header()?;

        let rows = self.mounted_rows().await;
        if rows.is_empty() {
            self.console.say("No drives are currently mounted.")?;
        } else {
            self.console.say(table::render(
                "Currently Mounted Drives",
                &["Remote Name", "Mount Point", "PID", "Uptime"],
                &rows,
            )?)?;
        }

        self.console.ask("\nPress Enter to continue...").await?;
        Ok(Flow::Back)
    }

    async fn unmount(&mut self, remote: &str) -> io::Result<()> {
        let result = self.registry.lock().await.unmount(remote).await;
        match result {
            Ok(report) => {
                if let Some(warning) = report.warning {
                    self.console.say(format!("Warning: {}", warning))?;
                }
                self.console.say(format!("{} successfully unmounted.", remote))
            }
            Err(e) => self.console.say(format!("Failed to unmount {}: {}", remote, e)),
        }
    }

    /// `[remote, mount point, pid, uptime]` for each tracked mount.
    async fn mounted_rows(&self) -> Vec<Vec<String>> {
        let registry = self.registry.lock().await;
        let now = Utc::now();
        registry
            .mounts()
            .map(|mount| {
                let uptime = (now - mount.started_at()).num_seconds().max(0);
                vec![
                    mount.remote().to_string(),
                    mount.target().to_string(),
                    mount.pid().to_string(),
                    format_uptime(uptime),
                ]
            })
            .collect()
    }

    /// Tell the user about helpers that died since the last look.
    async fn report_exited(&mut self) -> io::Result<()> {
        let exited = self.registry.lock().await.reap_exited();
        for mount in exited {
            debug!("Reporting exited mount {}", mount.remote);
            self.console.say(format!(
                "{} at {} stopped unexpectedly ({})",
                mount.remote, mount.target, mount.status
            ))?;
            for line in mount.last_output {
                self.console.say(format!("    {}", line.line))?;
            }
        }
        Ok(())
    }
}

fn choices(count: usize, extra: &[&str]) -> Vec<String> {
    (1..=count)
        .map(|i| i.to_string())
        .chain(extra.iter().map(|s| s.to_string()))
        .collect()
}

/// The item behind a 1-based menu number.
fn selected(choice: &str, items: &[String]) -> Option<String> {
    let index = choice.parse::<usize>().ok()?.checked_sub(1)?;
    items.get(index).cloned()
}

fn format_uptime(seconds: i64) -> String {
    let (hours, rest) = (seconds / 3600, seconds % 3600);
    format!("{:02}:{:02}:{:02}", hours, rest / 60, rest % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choices_and_selection() {
        let options = choices(2, &["b", "q"]);
        assert_eq!(options, vec!["1", "2", "b", "q"]);

        let items = vec!["gdrive".to_string(), "s3".to_string()];
        assert_eq!(selected("2", &items), Some("s3".to_string()));
        assert_eq!(selected("0", &items), None);
        assert_eq!(selected("3", &items), None);
        assert_eq!(selected("b", &items), None);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "00:00:00");
        assert_eq!(format_uptime(3725), "01:02:05");
    }

    #[cfg(unix)]
    mod flows {
        use super::super::*;
        use crate::config::MountMode;
        use crate::process::supervisor::tests::FakeHelper;
        use crate::process::ProcessSupervisor;
        use std::io::Cursor;

        type TestUi = MountManagerUi<Cursor<Vec<u8>>, Vec<u8>>;

        fn ui(helper: &FakeHelper, input: String) -> (TestUi, Arc<Mutex<MountRegistry>>) {
            let supervisor = ProcessSupervisor::new(helper.command())
                .with_grace_period(Duration::from_secs(2));
            let registry = Arc::new(Mutex::new(MountRegistry::new(supervisor, MountMode::Single)));
            let console = Console::new(Cursor::new(input.into_bytes()), Vec::new());
            let ui = MountManagerUi::new(
                console,
                Arc::clone(&registry),
                helper.command(),
                Duration::from_millis(50),
            );
            (ui, registry)
        }

        fn output(ui: &TestUi) -> String {
            String::from_utf8_lossy(ui.console().writer()).into_owned()
        }

        #[tokio::test]
        async fn test_mount_then_return_to_menu() {
            let helper = FakeHelper::new();
            let mount_point = helper.path().join("mnt/a");
            let input = format!("1\n1\n{}\nb\nb\n3\n\nq\n", mount_point.display());
            let (mut ui, registry) = ui(&helper, input);

            ui.run().await.unwrap();

            let out = output(&ui);
            assert!(out.contains("Available Cloud Drives"));
            assert!(out.contains(&format!("Successfully mounted driveA to {}", mount_point.display())));
            assert!(out.contains("Drive Monitor"));
            assert!(mount_point.is_dir());

            let mut registry = registry.lock().await;
            assert!(registry.is_mounted("driveA"));
            assert_eq!(registry.shutdown_all().await.unmounted, vec!["driveA"]);
        }

        #[tokio::test]
        async fn test_unmount_from_monitor() {
            let helper = FakeHelper::new();
            let mount_point = helper.path().join("b");
            let input = format!("1\n2\n{}\nq\nb\nq\n", mount_point.display());
            let (mut ui, registry) = ui(&helper, input);

            ui.run().await.unwrap();

            let out = output(&ui);
            assert!(out.contains("Unmounting driveB..."));
            assert!(out.contains("driveB successfully unmounted."));
            assert!(registry.lock().await.is_empty());
        }

        #[tokio::test]
        async fn test_unmount_menu_with_nothing_mounted() {
            let helper = FakeHelper::new();
            let (mut ui, _) = ui(&helper, "2\nq\n".to_string());

            ui.run().await.unwrap();
            assert!(output(&ui).contains("No drives are currently mounted."));
        }

        #[tokio::test]
        async fn test_quit_from_mount_menu() {
            let helper = FakeHelper::new();
            let (mut ui, _) = ui(&helper, "1\nq\n".to_string());

            ui.run().await.unwrap();
            let out = output(&ui);
            assert!(out.contains("driveA"));
            assert!(out.contains("Not Mounted"));
        }

        #[tokio::test]
        async fn test_input_closed_is_an_error() {
            let helper = FakeHelper::new();
            let (mut ui, _) = ui(&helper, "1\n".to_string());

            let err = ui.run().await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }
}
