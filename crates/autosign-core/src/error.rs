//! Error types for the autosign core library

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Faults that abort a signing pass
///
/// Per-transaction problems are not represented here; see [`TxError`].
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key file missing or malformed
    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),

    /// Transaction directory problem
    #[error("Transaction directory error: {0}")]
    TxDir(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Reasons a single wallet file could not be unlocked
#[derive(Debug, Error)]
pub enum WalletError {
    /// Wallet file could not be read
    #[error("cannot read wallet {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Wallet file is not a sealed wallet document
    #[error("malformed wallet {0}")]
    Malformed(String),

    /// Unsupported hash preset
    #[error("unsupported hash preset {0}")]
    HashPreset(u8),

    /// Authentication tag mismatch (wrong key file)
    #[error("decryption failed for {0}")]
    DecryptionFailed(String),

    /// Decrypted secret is not a valid signing key
    #[error("invalid secret in wallet {0}")]
    InvalidSecret(String),
}

/// Expected domain failures of one transaction
///
/// These are recorded against the file and never abort the batch.
#[derive(Debug, Error)]
pub enum TxError {
    /// Transaction file could not be read
    #[error("cannot read transaction file: {0}")]
    Unreadable(String),

    /// Transaction document could not be parsed
    #[error("malformed transaction: {0}")]
    Malformed(String),

    /// Transaction is for a coin not enabled on this signer
    #[error("coin {0} is not enabled for signing")]
    CoinNotEnabled(String),

    /// Transaction chain does not match the unlocking wallet
    #[error("chains do not match: tx file {tx}, wallet {wallet}")]
    ChainMismatch { tx: String, wallet: String },

    /// No unlocked wallet owns an input address
    #[error("no wallet key for input address {0}")]
    MissingKey(String),

    /// Transaction has nothing to sign
    #[error("transaction has no inputs")]
    NoInputs,

    /// Signature could not be produced or verified
    #[error("signing failed: {0}")]
    Signing(String),

    /// A signed file already exists for this base name
    #[error("signed file already exists")]
    AlreadySigned,
}
