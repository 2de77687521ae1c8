//! Device-resident key file
//!
//! The key file holds 32 random bytes encoded as 64 hex characters. Its text
//! is the passphrase for every local wallet; it never leaves the device.

use std::path::Path;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Number of random bytes behind a key file
pub const KEY_BYTES: usize = 32;

/// Length of the hex text stored in a key file
pub const KEY_HEX_LEN: usize = KEY_BYTES * 2;

/// Passphrase-equivalent key material read from the device
pub struct KeyMaterial {
    hex: Zeroizing<String>,
}

impl KeyMaterial {
    /// Generate fresh key material from the OS random source
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_BYTES]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self {
            hex: Zeroizing::new(hex::encode(&bytes[..])),
        }
    }

    /// Parse key file text; a single trailing newline is accepted
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_suffix('\n').unwrap_or(text);
        if body.len() != KEY_HEX_LEN {
            return Err(Error::InvalidKeyFile(format!(
                "expected {} hex characters, found {}",
                KEY_HEX_LEN,
                body.len()
            )));
        }
        if !body.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::InvalidKeyFile(
                "key must be lower-case hexadecimal".to_string(),
            ));
        }
        Ok(Self {
            hex: Zeroizing::new(body.to_string()),
        })
    }

    /// Read and parse the key file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidKeyFile(format!("cannot read {}: {}", path.display(), e))
        })?);
        Self::parse(&text)
    }

    /// Passphrase bytes used for wallet key derivation
    pub fn passphrase(&self) -> &[u8] {
        self.hex.as_bytes()
    }

    /// Text written to the key file
    pub fn file_contents(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}\n", self.hex.as_str()))
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}
