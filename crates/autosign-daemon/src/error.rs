//! Error types for the autosign daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] autosign_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Environment not fit to run at all (missing utility, no wallets)
    #[error("{0}")]
    Precondition(String),

    /// Removable device is not inserted
    #[error("Removable device not present!")]
    DeviceNotPresent,

    /// Mount or unmount command failed
    #[error("Mount error: {0}")]
    Mount(String),

    /// Transaction directory missing or not read/write
    #[error("{0} missing, or not read/writable by user!")]
    TxDir(String),

    /// Secure erase failed
    #[error("Wipe failed: {0}")]
    Wipe(String),

    /// Wallet could not be sealed or written
    #[error("Wallet error: {0}")]
    Wallet(#[from] autosign_core::WalletError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Status LED could not be driven
    #[error("LED error: {0}")]
    Led(String),

    /// Blocking worker did not complete
    #[error("Background task failed: {0}")]
    Task(String),

    /// Terminated by a signal
    #[error("Interrupted by {0}")]
    Interrupted(&'static str),
}

impl DaemonError {
    /// Process exit status for this error
    ///
    /// Precondition failures exit with 2, everything else with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::Precondition(_) => 2,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
