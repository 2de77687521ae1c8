//! Termination signal handling
//!
//! Signals do not exit the process from a handler. [`SignalGuard::wait`] is a
//! future that the orchestrator races against its work, so cleanup runs on
//! the same path as a normal return.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::info;

use crate::error::Result;

/// Listens for SIGINT and SIGTERM
pub struct SignalGuard {
    sigint: Signal,
    sigterm: Signal,
}

impl SignalGuard {
    /// Install the listeners; must be called inside a tokio runtime
    pub fn install() -> Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Resolve with the name of the first termination signal received
    pub async fn wait(&mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        };
        info!("Received {}", name);
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pending_without_signal() {
        let mut guard = SignalGuard::install().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), guard.wait()).await;
        assert!(waited.is_err());
    }
}
