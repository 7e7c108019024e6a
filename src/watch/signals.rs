// Signal handling for graceful shutdown of the background loops

use crate::error::{LibragError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// Which signal asked us to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    Hangup,
}

/// Listens for SIGTERM, SIGINT and SIGHUP
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| LibragError::io(e, "Failed to setup SIGTERM handler"))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| LibragError::io(e, "Failed to setup SIGINT handler"))?;
        let sighup = signal(SignalKind::hangup())
            .map_err(|e| LibragError::io(e, "Failed to setup SIGHUP handler"))?;

        Ok(Self {
            sigterm,
            sigint,
            sighup,
        })
    }

    /// Wait for any of the signals
    pub async fn wait(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                ShutdownSignal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                ShutdownSignal::Hangup
            }
        }
    }
}
