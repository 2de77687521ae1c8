//! Autosign Core - key material, wallets and batch signing
//!
//! This crate provides the pieces of an air-gapped signing pass that do not
//! touch the operating system beyond plain file access:
//! - Device key file parsing and generation
//! - Sealed wallet unlock, all-or-nothing across every local wallet
//! - Transaction documents and the ECDSA signing collaborator
//! - Queue scanning of the transaction directory
//! - Batch signing with per-transaction failure isolation
//! - Summary rendering

pub mod batch;
pub mod error;
pub mod keyfile;
pub mod queue;
pub mod summary;
pub mod tx;
pub mod types;
pub mod wallet;

pub use batch::{BatchResult, BatchSigner, SignOutcome, TxFailure};
pub use error::{Error, Result, TxError, WalletError};
pub use keyfile::KeyMaterial;
pub use summary::SummaryMode;
pub use tx::{EcdsaTxSigner, RawTx, SignedTx, TxSigner};
pub use types::{Amount, BaseName, Chain, Network, TxId};
pub use wallet::{SealedWalletUnlocker, Wallet, WalletSet, WalletUnlocker};

/// Extension of unsigned transaction files
pub const RAW_TX_EXT: &str = "rawtx";

/// Extension of signed transaction files
pub const SIGNED_TX_EXT: &str = "sigtx";

/// Name of the transaction directory on the device
pub const TX_DIR_NAME: &str = "tx";

/// Default name of the key file inside the transaction directory
pub const DEFAULT_KEY_FILENAME: &str = "autosign.key";
