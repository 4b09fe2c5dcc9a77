use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Level};

use rclone_mount_manager::process::SignalEvent;
use rclone_mount_manager::remotes;
use rclone_mount_manager::ui::{Console, MountManagerUi};
use rclone_mount_manager::{
    EscalationPolicy, ManagerConfig, ManagerError, MountMode, MountRegistry, ShutdownSignals,
};

/// Mount and unmount rclone remotes from a menu.
#[derive(Parser, Debug)]
#[command(name = "rclone-mount-manager")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/rclone-mount-manager/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Helper program to run instead of `rclone`
    #[arg(long, value_name = "PROGRAM")]
    helper: Option<String>,

    /// Allow several remotes to be mounted at once (stops helpers by
    /// process group only)
    #[arg(long)]
    multi_mount: bool,

    /// Seconds to wait for a helper to exit before force-killing it
    #[arg(long, value_name = "SECONDS")]
    grace_period: Option<u64>,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ManagerConfig> {
        let mut config =
            ManagerConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(helper) = &self.helper {
            config.helper = helper.clone();
        }
        if self.multi_mount {
            config.mode = MountMode::Multi;
            config.escalation = EscalationPolicy::KillProcessGroup;
        }
        if let Some(grace) = self.grace_period {
            config.grace_period_secs = grace;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

const STDIN_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

enum Outcome {
    Finished(io::Result<()>),
    Crashed(String),
    Signal(SignalEvent),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("An unexpected error occurred: {:#}", e);
            ExitCode::FAILURE
        }
    };

    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(STDIN_SHUTDOWN_TIMEOUT);
    code
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.load_config()?;
    let helper = config.helper_command();

    match remotes::helper_version(&helper).await {
        Ok(version) => info!("Using {}", version),
        Err(ManagerError::HelperUnavailable(e)) => {
            debug!("Helper check failed: {}", e);
            eprintln!("Error: rclone is not installed or not in your PATH.");
            eprintln!("Please install rclone from https://rclone.org/downloads/ and try again.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context("checking the rclone helper"),
    }

    let registry = Arc::new(Mutex::new(MountRegistry::from_config(&config)));
    let mut signals = ShutdownSignals::new().context("installing signal handlers")?;

    let mut ui = MountManagerUi::new(
        Console::stdio(),
        Arc::clone(&registry),
        helper,
        config.poll_interval(),
    );
    let mut ui_task = tokio::spawn(async move { ui.run().await });

    let outcome = tokio::select! {
        joined = &mut ui_task => match joined {
            Ok(result) => Outcome::Finished(result),
            Err(e) => Outcome::Crashed(e.to_string()),
        },
        event = signals.recv() => {
            ui_task.abort();
            let _ = ui_task.await;
            Outcome::Signal(event)
        }
    };

    let code = match outcome {
        Outcome::Finished(Ok(())) => {
            shutdown(&registry).await;
            println!("Exiting...");
            ExitCode::SUCCESS
        }
        Outcome::Finished(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("Input closed, exiting");
            shutdown(&registry).await;
            ExitCode::SUCCESS
        }
        Outcome::Signal(event) => {
            debug!("Shutting down on {:?}", event);
            println!("\nProgram terminated by user.");
            shutdown(&registry).await;
            ExitCode::SUCCESS
        }
        Outcome::Finished(Err(e)) => {
            error!("UI failed: {}", e);
            shutdown(&registry).await;
            eprintln!("An unexpected error occurred: {}", e);
            ExitCode::FAILURE
        }
        Outcome::Crashed(reason) => {
            error!("UI task crashed: {}", reason);
            shutdown(&registry).await;
            eprintln!("An unexpected error occurred: {}", reason);
            ExitCode::FAILURE
        }
    };

    Ok(code)
}

/// Unmount everything before the process goes away.
async fn shutdown(registry: &Mutex<MountRegistry>) {
    let mut registry = registry.lock().await;
    if registry.is_empty() {
        return;
    }

    println!("Unmounting drives before exit...");
    let report = registry.shutdown_all().await;
    for warning in &report.warnings {
        warn!("{}", warning);
        println!("Warning: {}", warning);
    }
    println!("All drives unmounted successfully.");
}
