//! Two-stage interrupt handling
//!
//! The first SIGINT/SIGTERM cancels the root token and arms a force-exit
//! timer. A second signal, or the timer firing, exits the process at once.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a graceful shutdown may take before the process is killed
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Exit status for a forced shutdown
pub const FORCED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    /// Cancel the root token and start the grace timer
    Graceful,
    /// Exit immediately
    Force,
}

/// Counts interrupts and decides what each one means
#[derive(Debug, Default)]
pub struct SignalCounter {
    received: u32,
}

impl SignalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_signal(&mut self) -> ShutdownAction {
        self.received = self.received.saturating_add(1);
        if self.received == 1 {
            ShutdownAction::Graceful
        } else {
            ShutdownAction::Force
        }
    }
}

/// Listen for interrupts for the rest of the process lifetime
///
/// # Errors
///
/// Fails if the OS signal handlers cannot be registered.
pub fn install_signal_handlers(root: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    install_with_grace(root, SHUTDOWN_GRACE)
}

pub fn install_with_grace(
    root: CancellationToken,
    grace: Duration,
) -> std::io::Result<JoinHandle<()>> {
    let mut signals = Signals::new()?;

    Ok(tokio::spawn(async move {
        let mut counter = SignalCounter::new();
        loop {
            let name = signals.recv().await;
            match counter.on_signal() {
                ShutdownAction::Graceful => {
                    tracing::warn!(
                        signal = name,
                        grace_secs = grace.as_secs(),
                        "Initiating graceful shutdown (signal again to force quit)"
                    );
                    root.cancel();
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        tracing::error!("Graceful shutdown timed out, forcing exit");
                        std::process::exit(FORCED_EXIT_CODE);
                    });
                }
                ShutdownAction::Force => {
                    tracing::error!(signal = name, "Force quit requested");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    }))
}

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}
