//! Transaction documents and the signing collaborator
//!
//! Unsigned (`.rawtx`) and signed (`.sigtx`) transactions are JSON documents.
//! The transaction id is the SHA-256 of the canonical unsigned document; the
//! same digest is what every input signature commits to.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TxError;
use crate::types::{Amount, Chain, PublicKey, Signature, TxId};
use crate::wallet::WalletSet;

/// Current transaction document version
pub const TX_VERSION: u32 = 1;

/// Transaction input spent from an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: String,
    pub amount: Amount,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: Amount,
    /// Label of the local wallet that owns this address, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_label: Option<String>,
}

impl TxOutput {
    pub fn is_wallet_owned(&self) -> bool {
        self.wallet_label.is_some()
    }
}

/// Unsigned transaction document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    pub version: u32,
    pub coin: String,
    pub chain: Chain,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub locktime: u32,
}

impl RawTx {
    /// Parse an unsigned transaction document
    pub fn parse(bytes: &[u8]) -> Result<Self, TxError> {
        let tx: RawTx =
            serde_json::from_slice(bytes).map_err(|e| TxError::Malformed(e.to_string()))?;

        if tx.version != TX_VERSION {
            return Err(TxError::Malformed(format!(
                "unsupported version {}",
                tx.version
            )));
        }
        if tx.coin.is_empty() {
            return Err(TxError::Malformed("missing coin".to_string()));
        }

        Ok(tx)
    }

    /// Canonical serialization
    pub fn to_json(&self) -> Result<Vec<u8>, TxError> {
        serde_json::to_vec(self).map_err(|e| TxError::Malformed(e.to_string()))
    }

    /// SHA-256 of the canonical serialization
    pub fn digest(&self) -> Result<[u8; 32], TxError> {
        Ok(Sha256::digest(self.to_json()?).into())
    }

    pub fn txid(&self) -> Result<TxId, TxError> {
        Ok(TxId::new(self.digest()?))
    }

    pub fn input_total(&self) -> Amount {
        self.inputs.iter().map(|i| i.amount).sum()
    }

    pub fn output_total(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Inputs minus outputs, or `None` when outputs exceed inputs
    pub fn fee(&self) -> Option<Amount> {
        self.input_total()
            .units()
            .checked_sub(self.output_total().units())
            .map(Amount)
    }
}

/// Signature over the transaction digest for one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature {
    pub address: String,
    pub public_key: PublicKey,
    pub signature: Signature,
}

/// Signed transaction document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: RawTx,
    pub signatures: Vec<InputSignature>,
    pub signed_at: DateTime<Utc>,
}

impl SignedTx {
    pub fn parse(bytes: &[u8]) -> Result<Self, TxError> {
        serde_json::from_slice(bytes).map_err(|e| TxError::Malformed(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, TxError> {
        serde_json::to_vec_pretty(self).map_err(|e| TxError::Malformed(e.to_string()))
    }

    pub fn txid(&self) -> Result<TxId, TxError> {
        self.tx.txid()
    }

    /// Outputs not owned by any local wallet
    pub fn non_wallet_outputs(&self) -> impl Iterator<Item = &TxOutput> {
        self.tx.outputs.iter().filter(|o| !o.is_wallet_owned())
    }

    /// Check every input signature against the document digest
    pub fn verify(&self) -> Result<(), TxError> {
        let digest = self.tx.digest()?;
        if self.signatures.len() != self.tx.inputs.len() {
            return Err(TxError::Signing("signature count mismatch".to_string()));
        }
        for (input, sig) in self.tx.inputs.iter().zip(&self.signatures) {
            if input.address != sig.address {
                return Err(TxError::Signing(format!(
                    "signature for {} does not match input {}",
                    sig.address, input.address
                )));
            }
            verify_input(&sig.public_key, &digest, &sig.signature)?;
        }
        Ok(())
    }

    /// Human-readable view of the whole transaction
    pub fn format_view(&self) -> String {
        let txid = self
            .txid()
            .map(|id| id.short())
            .unwrap_or_else(|_| "??????".to_string());
        let coin = &self.tx.coin;

        let mut out = String::new();
        let _ = writeln!(out, "Transaction {}  {} {}", txid, coin, self.tx.chain);
        let _ = writeln!(out, "  Inputs:");
        for input in &self.tx.inputs {
            let _ = writeln!(out, "    {}  {} {}", input.address, input.amount, coin);
        }
        let _ = writeln!(out, "  Outputs:");
        for output in &self.tx.outputs {
            match &output.wallet_label {
                Some(label) => {
                    let _ = writeln!(
                        out,
                        "    {}  {} {}  [{}]",
                        output.address, output.amount, coin, label
                    );
                }
                None => {
                    let _ = writeln!(out, "    {}  {} {}", output.address, output.amount, coin);
                }
            }
        }
        match self.tx.fee() {
            Some(fee) => {
                let _ = writeln!(out, "  Fee: {} {}", fee, coin);
            }
            None => {
                let _ = writeln!(out, "  Fee: outputs exceed inputs");
            }
        }
        let _ = writeln!(
            out,
            "  Signed: {}",
            self.signed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        out
    }
}

fn verify_input(
    public_key: &PublicKey,
    digest: &[u8; 32],
    signature: &Signature,
) -> Result<(), TxError> {
    let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key.as_bytes())
        .map_err(|e| TxError::Signing(format!("Invalid public key: {}", e)))?;
    let sig = k256::ecdsa::Signature::from_slice(signature.as_bytes())
        .map_err(|e| TxError::Signing(format!("Invalid signature format: {}", e)))?;
    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| TxError::Signing("Signature verification failed".to_string()))
}

/// Signs one transaction with the unlocked wallets
pub trait TxSigner: Send + Sync {
    fn sign(&self, tx: &RawTx, wallets: &WalletSet) -> Result<SignedTx, TxError>;
}

/// secp256k1 ECDSA signer restricted to a set of coins
#[derive(Debug, Clone)]
pub struct EcdsaTxSigner {
    coins: BTreeSet<String>,
}

impl EcdsaTxSigner {
    pub fn new<I, S>(coins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            coins: coins
                .into_iter()
                .map(|c| c.as_ref().trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

impl TxSigner for EcdsaTxSigner {
    fn sign(&self, tx: &RawTx, wallets: &WalletSet) -> Result<SignedTx, TxError> {
        let coin = tx.coin.to_uppercase();
        if !self.coins.contains(&coin) {
            return Err(TxError::CoinNotEnabled(coin));
        }
        if tx.inputs.is_empty() {
            return Err(TxError::NoInputs);
        }

        let digest = tx.digest()?;
        let mut signatures = Vec::with_capacity(tx.inputs.len());

        for input in &tx.inputs {
            let wallet = wallets
                .find_by_address(&input.address)
                .ok_or_else(|| TxError::MissingKey(input.address.clone()))?;

            if wallet.network() != tx.chain.network() {
                return Err(TxError::ChainMismatch {
                    tx: tx.chain.to_string(),
                    wallet: wallet.network().to_string(),
                });
            }

            let sig: k256::ecdsa::Signature = wallet
                .signing_key()
                .sign_prehash(&digest)
                .map_err(|e| TxError::Signing(e.to_string()))?;
            let mut sig_bytes = [0u8; 64];
            sig_bytes.copy_from_slice(&sig.to_bytes());
            let signature = Signature::new(sig_bytes);

            verify_input(wallet.public_key(), &digest, &signature)?;

            signatures.push(InputSignature {
                address: input.address.clone(),
                public_key: *wallet.public_key(),
                signature,
            });
        }

        Ok(SignedTx {
            tx: tx.clone(),
            signatures,
            signed_at: Utc::now(),
        })
    }
}
