//! Batch signer
//!
//! Signs each pending transaction in isolation. Anything wrong with one file,
//! from an unreadable entry to a refused signature, is recorded against that
//! file as a [`TxError`] and the batch moves on. Only faults writing the
//! signed output propagate and end the pass.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Result, TxError};
use crate::tx::{RawTx, SignedTx, TxSigner};
use crate::types::BaseName;
use crate::wallet::WalletSet;

/// A transaction that could not be signed
#[derive(Debug)]
pub struct TxFailure {
    pub base: BaseName,
    pub reason: TxError,
}

/// Result of signing one pending transaction
#[derive(Debug)]
pub enum SignOutcome {
    Signed(SignedTx),
    Failed(TxFailure),
}

/// Outcome of one signing pass, in processing order
#[derive(Debug, Default)]
pub struct BatchResult {
    pub signed: Vec<SignedTx>,
    pub failed: Vec<TxFailure>,
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

impl BatchResult {
    pub fn record(&mut self, outcome: SignOutcome) {
        match outcome {
            SignOutcome::Signed(tx) => self.signed.push(tx),
            SignOutcome::Failed(failure) => self.failed.push(failure),
        }
    }

    /// True when no transaction failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.signed.len() + self.failed.len()
    }

    /// Signed and failed counts
    pub fn report(&self) -> String {
        let mut out = format!(
            "{} transaction{} signed",
            self.signed.len(),
            plural(self.signed.len())
        );
        if !self.failed.is_empty() {
            out.push_str(&format!(
                "\n{} transaction{} failed to sign",
                self.failed.len(),
                plural(self.failed.len())
            ));
        }
        out
    }

    /// Sorted listing of failed files, if any failed
    pub fn failure_listing(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let mut names: Vec<String> = self
            .failed
            .iter()
            .map(|f| f.base.raw_file_name())
            .collect();
        names.sort();
        Some(format!("Failed transactions:\n  {}", names.join("\n  ")))
    }
}

/// Signs pending transactions in one transaction directory
pub struct BatchSigner<'a> {
    tx_dir: &'a Path,
    signer: &'a dyn TxSigner,
    wallets: &'a WalletSet,
}

impl<'a> BatchSigner<'a> {
    pub fn new(tx_dir: &'a Path, signer: &'a dyn TxSigner, wallets: &'a WalletSet) -> Self {
        Self {
            tx_dir,
            signer,
            wallets,
        }
    }

    /// Sign one pending transaction and persist the signed file
    pub fn sign_one(&self, base: &BaseName) -> Result<SignOutcome> {
        let raw_path = self.tx_dir.join(base.raw_file_name());
        let bytes = match std::fs::read(&raw_path) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(self.failed(base, TxError::Unreadable(e.to_string()))),
        };

        let signed = match RawTx::parse(&bytes).and_then(|tx| self.signer.sign(&tx, self.wallets))
        {
            Ok(signed) => signed,
            Err(reason) => return Ok(self.failed(base, reason)),
        };

        let body = match signed.to_json_pretty() {
            Ok(body) => body,
            Err(reason) => return Ok(self.failed(base, reason)),
        };

        if let Err(reason) = self.persist(base, &body)? {
            return Ok(self.failed(base, reason));
        }

        match signed.txid() {
            Ok(txid) => info!("Signed {} (txid {})", base.raw_file_name(), txid),
            Err(_) => info!("Signed {}", base.raw_file_name()),
        }
        Ok(SignOutcome::Signed(signed))
    }

    /// Sign every base name in order
    ///
    /// Yields to the runtime after each file so a pending shutdown is
    /// observed between transactions.
    pub async fn sign_all(&self, bases: &[BaseName]) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        for base in bases {
            result.record(self.sign_one(base)?);
            tokio::task::yield_now().await;
        }
        Ok(result)
    }

    fn failed(&self, base: &BaseName, reason: TxError) -> SignOutcome {
        warn!("{}: {}", base.raw_file_name(), reason);
        SignOutcome::Failed(TxFailure {
            base: base.clone(),
            reason,
        })
    }

    /// Write the signed file without ever replacing an existing one
    ///
    /// The outer error is an I/O fault; the inner one a per-file failure.
    fn persist(&self, base: &BaseName, body: &[u8]) -> Result<std::result::Result<(), TxError>> {
        let path = self.tx_dir.join(base.signed_file_name());
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(Err(TxError::AlreadySigned))
            }
            Err(e) => return Err(e.into()),
        };

        let written = file.write_all(body).and_then(|_| file.sync_all());
        if let Err(e) = written {
            drop(file);
            // a partial signed file would hide the transaction from the next pass
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(Ok(()))
    }
}
