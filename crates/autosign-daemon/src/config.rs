//! Controller configuration

use std::path::{Path, PathBuf};

use autosign_core::{SummaryMode, DEFAULT_KEY_FILENAME, TX_DIR_NAME};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable naming an alternate configuration file
pub const CONFIG_ENV: &str = "AUTOSIGN_CONFIG";

/// Environment variable forcing the simulated LED
pub const SIMULATE_LED_ENV: &str = "AUTOSIGN_SIMULATE_LED";

/// Coin signed for when none are configured
pub const DEFAULT_COIN: &str = "BTC";

/// Status LED usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedMode {
    #[default]
    Off,
    On,
    /// Signal busy and error only, and only after the wallets unlock
    Stealth,
}

/// Summary verbosity as stored in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryChoice {
    None,
    #[default]
    Outputs,
    Full,
}

impl From<SummaryChoice> for SummaryMode {
    fn from(choice: SummaryChoice) -> Self {
        match choice {
            SummaryChoice::None => SummaryMode::None,
            SummaryChoice::Outputs => SummaryMode::Outputs,
            SummaryChoice::Full => SummaryMode::Full,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosignConfig {
    /// Mount target of the removable device
    pub mountpoint: PathBuf,

    /// Directory holding the sealed local wallets
    pub wallet_dir: PathBuf,

    /// Filesystem label of the removable partition
    pub device_label: String,

    /// Directory where labelled partitions appear
    pub label_dir: PathBuf,

    /// Key file name inside the transaction directory
    pub key_filename: String,

    /// Whether to wait for the device marker before signing
    pub insert_check: bool,

    /// Status LED usage
    pub led: LedMode,

    /// Summary printed after each pass
    pub summary: SummaryChoice,

    /// Coins to sign for
    pub coins: Vec<String>,

    /// Prefix mount commands with sudo
    pub use_sudo: bool,

    /// Device polling interval in loop mode (milliseconds)
    pub poll_interval_ms: u64,

    /// Drive a simulated LED instead of hardware
    pub simulate_led: bool,
}

impl Default for AutosignConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::from("/mnt/tx"),
            wallet_dir: PathBuf::from("/dev/shm/autosign"),
            device_label: "AUTOSIGN_TX".to_string(),
            label_dir: PathBuf::from("/dev/disk/by-label"),
            key_filename: DEFAULT_KEY_FILENAME.to_string(),
            insert_check: true,
            led: LedMode::Off,
            summary: SummaryChoice::Outputs,
            coins: Vec::new(),
            use_sudo: false,
            poll_interval_ms: 1000,
            simulate_led: false,
        }
    }
}

impl AutosignConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autosign").join("config.json"))
    }

    /// Configuration file to read: `$AUTOSIGN_CONFIG`, else the default path
    pub fn locate() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load `path` if given, else the located file if it exists, else defaults
    ///
    /// An explicitly named file must exist.
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::locate() {
                Some(found) if found.exists() => Self::load(&found)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if std::env::var(SIMULATE_LED_ENV).is_ok_and(|v| v == "1") {
            self.simulate_led = true;
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.key_filename.is_empty() || self.key_filename.contains('/') {
            return Err(crate::DaemonError::Config(format!(
                "invalid key file name {:?}",
                self.key_filename
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::DaemonError::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Transaction queue directory on the device
    pub fn tx_dir(&self) -> PathBuf {
        self.mountpoint.join(TX_DIR_NAME)
    }

    /// Key file on the device
    pub fn key_path(&self) -> PathBuf {
        self.tx_dir().join(&self.key_filename)
    }

    /// Path whose existence means the device is inserted
    pub fn device_marker(&self) -> PathBuf {
        self.label_dir.join(&self.device_label)
    }

    /// Enabled coins, falling back to BTC
    pub fn enabled_coins(&self) -> Vec<String> {
        if self.coins.is_empty() {
            warn!("No coins configured, signing for {} only", DEFAULT_COIN);
            vec![DEFAULT_COIN.to_string()]
        } else {
            self.coins.iter().map(|c| c.trim().to_uppercase()).collect()
        }
    }
}
