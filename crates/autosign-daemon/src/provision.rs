//! Key file and wallet provisioning
//!
//! A key file is never merely unlinked: an existing one is securely erased
//! before the replacement is written.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use autosign_core::{
    wallet::{seal_wallet, wallet_file_name, DEFAULT_HASH_PRESET},
    KeyMaterial, Network,
};
use tokio::process::Command;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{DaemonError, Result};

/// Label of the wallet created by `setup`
pub const SETUP_WALLET_LABEL: &str = "Autosign Wallet";

/// Source of the `setup` wallet secret, asked only once the device is ready
///
/// `None` means a random secret.
pub type SeedPrompt = Box<dyn FnOnce() -> Result<Option<Zeroizing<[u8; 32]>>> + Send>;

/// Secure erase of a file
#[async_trait]
pub trait KeyWiper: Send + Sync {
    /// Fails with a precondition error when erasing is impossible
    async fn check_available(&self) -> Result<()>;

    /// Overwrite and remove `path`
    async fn wipe(&self, path: &Path) -> Result<()>;
}

/// Secure erase through the `wipe` utility
#[derive(Debug, Clone, Default)]
pub struct SystemWiper;

#[async_trait]
impl KeyWiper for SystemWiper {
    async fn check_available(&self) -> Result<()> {
        let ok = Command::new("wipe")
            .arg("-v")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);

        if ok {
            Ok(())
        } else {
            Err(DaemonError::Precondition(
                "The 'wipe' utility must be installed before running this program".to_string(),
            ))
        }
    }

    async fn wipe(&self, path: &Path) -> Result<()> {
        // -c: chmod if needed, -f: no confirmation
        let output = Command::new("wipe")
            .arg("-cf")
            .arg(path)
            .output()
            .await
            .map_err(|e| DaemonError::Wipe(format!("Failed to execute wipe: {}", e)))?;

        if !output.status.success() {
            return Err(DaemonError::Wipe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Writes the device key file
pub struct KeyProvisioner {
    wiper: Arc<dyn KeyWiper>,
    key_path: PathBuf,
}

impl KeyProvisioner {
    pub fn new(wiper: Arc<dyn KeyWiper>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            wiper,
            key_path: key_path.into(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub async fn check_wiper(&self) -> Result<()> {
        self.wiper.check_available().await
    }

    /// Securely erase the key file if there is one
    pub async fn wipe_existing_key(&self) -> Result<()> {
        if std::fs::symlink_metadata(&self.key_path).is_err() {
            return Ok(());
        }

        info!("Wiping existing key {}", self.key_path.display());
        self.wiper.wipe(&self.key_path).await?;

        if std::fs::symlink_metadata(&self.key_path).is_ok() {
            return Err(DaemonError::Wipe(format!(
                "{} still present after wipe",
                self.key_path.display()
            )));
        }
        Ok(())
    }

    /// Write a fresh random key, readable by the owner only
    pub fn create_key(&self) -> Result<KeyMaterial> {
        let key = KeyMaterial::generate();
        let desc = format!("key file {}", self.key_path.display());
        info!("Creating {}", desc);

        write_restricted(&self.key_path, key.file_contents().as_bytes(), 0o400).map_err(|e| {
            DaemonError::Precondition(format!("Unable to write {}: {}", desc, e))
        })?;

        info!("Wrote {}", desc);
        Ok(key)
    }

    /// Replace any existing key with a new one
    pub async fn provision(&self) -> Result<KeyMaterial> {
        self.wipe_existing_key().await?;
        self.create_key()
    }
}

/// Create `path` exclusively, write `contents`, then set `mode`
fn write_restricted(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

/// Create the local wallet directory if it does not exist
pub fn create_wallet_dir(dir: &Path) -> Result<()> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        debug!("create_dir_all {:?}: {}", dir, e);
    }
    if !dir.is_dir() {
        return Err(DaemonError::Precondition(format!(
            "Unable to create wallet directory '{}'",
            dir.display()
        )));
    }
    Ok(())
}

/// Delete the local wallet directory and everything in it
pub fn remove_wallet_dir(dir: &Path) {
    info!("Deleting '{}'", dir.display());
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!("remove_dir_all {:?}: {}", dir, e);
    }
}

/// Parse a wallet seed typed by the operator; blank input means "random"
pub fn parse_seed(text: &str) -> Result<Option<Zeroizing<[u8; 32]>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let mut seed = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(text, &mut seed[..])
        .map_err(|_| DaemonError::Config("seed must be 64 hex characters".to_string()))?;
    Ok(Some(seed))
}

/// Ask the operator for a seed on stderr and read one line from stdin
pub fn prompt_seed() -> Result<Option<Zeroizing<[u8; 32]>>> {
    let mut stderr = std::io::stderr();
    write!(
        stderr,
        "Enter a 64-character hex seed for the autosign wallet, or press Enter for a random one: "
    )?;
    stderr.flush()?;

    let mut line = Zeroizing::new(String::new());
    std::io::stdin().read_line(&mut line)?;
    parse_seed(&line)
}

/// Random secp256k1 secret for a new wallet
pub fn random_secret() -> Zeroizing<[u8; 32]> {
    let secret = k256::SecretKey::random(&mut rand::rngs::OsRng);
    let mut bytes = Zeroizing::new([0u8; 32]);
    bytes.copy_from_slice(&secret.to_bytes());
    bytes
}

/// Seal `secret` under `key` and store it in `wallet_dir`
pub fn write_wallet(wallet_dir: &Path, secret: &[u8; 32], key: &KeyMaterial) -> Result<PathBuf> {
    let sealed = seal_wallet(
        secret,
        SETUP_WALLET_LABEL,
        Network::Mainnet,
        key,
        DEFAULT_HASH_PRESET,
    )?;
    let path = wallet_dir.join(wallet_file_name(secret)?);

    write_restricted(&path, &sealed, 0o600)?;
    info!("Wrote autosign wallet {}", path.display());
    Ok(path)
}
