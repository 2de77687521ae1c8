//! Core newtypes shared by the queue, wallet and signing modules

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Filename stem shared by an unsigned and a signed transaction file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseName(String);

impl BaseName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the unsigned transaction
    pub fn raw_file_name(&self) -> String {
        format!("{}.{}", self.0, crate::RAW_TX_EXT)
    }

    /// File name of the signed transaction
    pub fn signed_file_name(&self) -> String {
        format!("{}.{}", self.0, crate::SIGNED_TX_EXT)
    }
}

impl fmt::Display for BaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BaseName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transaction identifier (SHA-256 of the canonical unsigned document)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Short display format (first 3 bytes, upper-case hex)
    pub fn short(&self) -> String {
        hex::encode_upper(&self.0[..3])
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Chain a transaction document targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Mainnet,
    Testnet,
    Regtest,
}

impl Chain {
    /// Key network a wallet must belong to in order to sign for this chain
    pub fn network(&self) -> Network {
        match self {
            Chain::Mainnet => Network::Mainnet,
            Chain::Testnet | Chain::Regtest => Network::Testnet,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet",
            Chain::Testnet => "testnet",
            Chain::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network a wallet's keys are valid on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

/// Amount in base units (1e-8 of a coin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const UNITS_PER_COIN: u64 = 100_000_000;

    pub fn units(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / Self::UNITS_PER_COIN,
            self.0 % Self::UNITS_PER_COIN
        )
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Amount(iter.map(|a| a.0).fold(0u64, u64::saturating_add))
    }
}

/// Compressed secp256k1 public key (33 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "hex_array")] pub [u8; 33]);

impl PublicKey {
    pub fn new(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

}

/// ECDSA signature (64 bytes: r || s)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// Serde helper for fixed-size byte arrays as hex strings
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; N];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for variable-length byte vectors as hex strings
pub mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount(0).to_string(), "0.00000000");
        assert_eq!(Amount(150_000_000).to_string(), "1.50000000");
        assert_eq!(Amount(1).to_string(), "0.00000001");
    }

    #[test]
    fn test_base_name_file_names() {
        let base = BaseName::from("abc");
        assert_eq!(base.raw_file_name(), "abc.rawtx");
        assert_eq!(base.signed_file_name(), "abc.sigtx");
    }

    #[test]
    fn test_txid_short() {
        let id = TxId::new([0xab; 32]);
        assert_eq!(id.short(), "ABABAB");
    }

    #[test]
    fn test_chain_network() {
        assert_eq!(Chain::Mainnet.network(), Network::Mainnet);
        assert_eq!(Chain::Regtest.network(), Network::Testnet);
        let parsed: Chain = serde_json::from_str("\"testnet\"").unwrap();
        assert_eq!(parsed, Chain::Testnet);
    }
}
