//! Sealed local wallets
//!
//! Each wallet file on the signing machine holds one secp256k1 secret,
//! encrypted with ChaCha20-Poly1305 under a key derived from the device key
//! file via Argon2id.
//!
//! # File Format
//!
//! JSON document with:
//! - format version, label and key network
//! - hash preset selecting the Argon2id cost
//! - 16-byte salt and 12-byte nonce (hex)
//! - ciphertext with the 16-byte authentication tag appended (hex)
//!
//! Decrypted wallets live only in memory. Their secrets are zeroized when the
//! [`Wallet`] is dropped, so discarding a [`WalletSet`] scrubs every key it
//! held.

use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::WalletError;
use crate::keyfile::KeyMaterial;
use crate::types::{hex_array, hex_vec, Network, PublicKey};

/// Extension of sealed wallet files
pub const WALLET_EXT: &str = "wallet";

/// Hash preset used for every autosign wallet
pub const DEFAULT_HASH_PRESET: u8 = 1;

/// Current sealed wallet format version
const WALLET_VERSION: u32 = 1;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

/// On-disk sealed wallet document
#[derive(Serialize, Deserialize)]
struct SealedWallet {
    version: u32,
    label: String,
    network: Network,
    hash_preset: u8,
    #[serde(with = "hex_array")]
    salt: [u8; SALT_SIZE],
    #[serde(with = "hex_array")]
    nonce: [u8; NONCE_SIZE],
    #[serde(with = "hex_vec")]
    ciphertext: Vec<u8>,
}

/// Argon2id parameters for a hash preset
fn preset_params(preset: u8) -> Result<Params, WalletError> {
    let (m_cost, t_cost) = match preset {
        1 => (8 * 1024, 1),
        2 => (32 * 1024, 2),
        3 => (64 * 1024, 3),
        other => return Err(WalletError::HashPreset(other)),
    };
    Params::new(m_cost, t_cost, 1, Some(32)).map_err(|_| WalletError::HashPreset(preset))
}

fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    preset: u8,
) -> Result<Zeroizing<[u8; 32]>, WalletError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, preset_params(preset)?);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|_| WalletError::HashPreset(preset))?;
    Ok(key)
}

/// Address of a public key: hex of the first 20 bytes of its SHA-256
pub fn address_for(public_key: &PublicKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    hex::encode(&digest[..20])
}

/// A decrypted wallet
pub struct Wallet {
    label: String,
    network: Network,
    path: PathBuf,
    secret: k256::SecretKey,
    public_key: PublicKey,
    address: String,
}

impl Wallet {
    fn from_secret(
        secret_bytes: &[u8],
        label: String,
        network: Network,
        path: PathBuf,
    ) -> Result<Self, WalletError> {
        let secret = k256::SecretKey::from_slice(secret_bytes)
            .map_err(|_| WalletError::InvalidSecret(path.display().to_string()))?;
        let encoded = secret.public_key().to_encoded_point(true);
        let mut compressed = [0u8; 33];
        compressed.copy_from_slice(encoded.as_bytes());
        let public_key = PublicKey::new(compressed);
        let address = address_for(&public_key);

        Ok(Self {
            label,
            network,
            path,
            secret,
            public_key,
            address,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Address controlled by this wallet
    pub fn address(&self) -> &str {
        &self.address
    }

    /// ECDSA signing key for this wallet's secret
    pub fn signing_key(&self) -> k256::ecdsa::SigningKey {
        k256::ecdsa::SigningKey::from(&self.secret)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("label", &self.label)
            .field("network", &self.network)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Every wallet unlocked for one signing pass
#[derive(Debug, Default)]
pub struct WalletSet {
    wallets: Vec<Wallet>,
}

impl WalletSet {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self { wallets }
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.iter()
    }

    /// Wallet controlling `address`, if any
    pub fn find_by_address(&self, address: &str) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.address == address)
    }
}

/// Loads one wallet file with the device key
pub trait WalletUnlocker: Send + Sync {
    fn unlock(&self, path: &Path, key: &KeyMaterial) -> Result<Wallet, WalletError>;
}

/// Unlocker for sealed wallet files at a fixed hash preset
#[derive(Debug, Clone, Copy)]
pub struct SealedWalletUnlocker {
    hash_preset: u8,
}

impl Default for SealedWalletUnlocker {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_PRESET)
    }
}

impl SealedWalletUnlocker {
    pub fn new(hash_preset: u8) -> Self {
        Self { hash_preset }
    }
}

impl WalletUnlocker for SealedWalletUnlocker {
    fn unlock(&self, path: &Path, key: &KeyMaterial) -> Result<Wallet, WalletError> {
        let display = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|source| WalletError::Read {
            path: display.clone(),
            source,
        })?;

        let sealed: SealedWallet =
            serde_json::from_slice(&bytes).map_err(|_| WalletError::Malformed(display.clone()))?;

        if sealed.version != WALLET_VERSION {
            return Err(WalletError::Malformed(display));
        }
        if sealed.hash_preset != self.hash_preset {
            return Err(WalletError::HashPreset(sealed.hash_preset));
        }

        let aead_key = derive_key(key.passphrase(), &sealed.salt, sealed.hash_preset)?;
        let cipher = ChaCha20Poly1305::new_from_slice(&aead_key[..])
            .map_err(|_| WalletError::DecryptionFailed(display.clone()))?;

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
                .map_err(|_| WalletError::DecryptionFailed(display.clone()))?,
        );

        Wallet::from_secret(&plaintext, sealed.label, sealed.network, path.to_path_buf())
    }
}

/// Unlock every wallet in `paths`, or none of them
///
/// The first failure discards the wallets unlocked so far, zeroizing their
/// secrets before the error is returned.
pub fn unlock_all(
    unlocker: &dyn WalletUnlocker,
    paths: &[PathBuf],
    key: &KeyMaterial,
) -> Result<WalletSet, WalletError> {
    info!(
        "Unlocking {} wallet{}",
        paths.len(),
        if paths.len() == 1 { "" } else { "s" }
    );

    let mut unlocked = Vec::with_capacity(paths.len());
    for path in paths {
        match unlocker.unlock(path, key) {
            Ok(wallet) => {
                debug!("Unlocked wallet {:?} ({})", wallet.label(), wallet.address());
                unlocked.push(wallet);
            }
            Err(e) => {
                warn!("Wallet unlock failed: {}", e);
                drop(unlocked);
                return Err(e);
            }
        }
    }

    Ok(WalletSet::new(unlocked))
}

/// Seal `secret` into a wallet document encrypted with `key`
pub fn seal_wallet(
    secret: &[u8; 32],
    label: &str,
    network: Network,
    key: &KeyMaterial,
    hash_preset: u8,
) -> Result<Vec<u8>, WalletError> {
    k256::SecretKey::from_slice(secret)
        .map_err(|_| WalletError::InvalidSecret(label.to_string()))?;

    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let aead_key = derive_key(key.passphrase(), &salt, hash_preset)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&aead_key[..])
        .map_err(|_| WalletError::DecryptionFailed(label.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret.as_slice())
        .map_err(|_| WalletError::DecryptionFailed(label.to_string()))?;

    let sealed = SealedWallet {
        version: WALLET_VERSION,
        label: label.to_string(),
        network,
        hash_preset,
        salt,
        nonce,
        ciphertext,
    };

    serde_json::to_vec_pretty(&sealed).map_err(|_| WalletError::Malformed(label.to_string()))
}

/// File name for a wallet holding `secret`
pub fn wallet_file_name(secret: &[u8; 32]) -> Result<String, WalletError> {
    let wallet = Wallet::from_secret(secret, String::new(), Network::Mainnet, PathBuf::new())?;
    Ok(format!("{}.{}", &wallet.address()[..8], WALLET_EXT))
}

/// Sealed wallet files in `dir`, sorted by path
pub fn list_wallet_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(WALLET_EXT) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
