#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// Interrupts that should end the program after cleaning up mounts.
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sighup: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn new() -> Result<Self, std::io::Error> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> Result<Self, std::io::Error> {
        Ok(Self {})
    }

    /// Wait for the next shutdown signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.sigint.recv() => {
                debug!("Received SIGINT");
                SignalEvent::Interrupt
            }
            _ = self.sigterm.recv() => {
                debug!("Received SIGTERM");
                SignalEvent::Terminate
            }
            _ = self.sighup.recv() => {
                debug!("Received SIGHUP");
                SignalEvent::Hangup
            }
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> SignalEvent {
        match tokio::signal::ctrl_c().await {
            Ok(()) => debug!("Received Ctrl+C"),
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
        SignalEvent::Interrupt
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalEvent {
    Interrupt,
    Terminate,
    Hangup,
}
