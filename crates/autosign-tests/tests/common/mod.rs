//! Shared fixtures: a scripted mount backend, a scripted device, a counting
//! wiper, and a device/wallet layout under a temporary directory.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use autosign_core::{
    tx::{RawTx, TxInput, TxOutput, TX_VERSION},
    wallet::{seal_wallet, wallet_file_name, DEFAULT_HASH_PRESET},
    Amount, Chain, EcdsaTxSigner, KeyMaterial, Network, SealedWalletUnlocker, Wallet, WalletError,
    WalletUnlocker,
};
use autosign_daemon::{
    AutosignConfig, Autosigner, Collaborators, DaemonError, DeviceMonitor, KeyWiper, LabelMonitor,
    LedMode, MountOps, SimulatedLed,
};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Mount backend that only flips a flag and counts calls
#[derive(Default)]
pub struct ScriptedMount {
    mounted: AtomicBool,
    fail_unmount: bool,
    pub mounts: AtomicUsize,
    pub syncs: AtomicUsize,
    pub unmounts: AtomicUsize,
    /// Notified each time the device gets mounted
    pub on_mount: Notify,
}

impl ScriptedMount {
    /// Backend whose `umount` always fails, leaving the device mounted
    pub fn failing_unmount() -> Self {
        Self {
            fail_unmount: true,
            ..Default::default()
        }
    }

    pub fn mounts(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmounts(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MountOps for ScriptedMount {
    async fn is_mounted(&self, _mountpoint: &Path) -> autosign_daemon::Result<bool> {
        Ok(self.mounted.load(Ordering::SeqCst))
    }

    async fn mount(&self, _mountpoint: &Path) -> autosign_daemon::Result<()> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        self.mounted.store(true, Ordering::SeqCst);
        self.on_mount.notify_one();
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn sync(&self) -> autosign_daemon::Result<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unmount(&self, _mountpoint: &Path) -> autosign_daemon::Result<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmount {
            return Err(DaemonError::Mount("umount failed: target is busy".into()));
        }
        self.mounted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Device that reports a fixed sequence of presence samples
///
/// Once the sequence runs out it reports absent and notifies `exhausted`.
#[derive(Default)]
pub struct ScriptedDevice {
    samples: Mutex<VecDeque<bool>>,
    pub exhausted: Notify,
}

impl ScriptedDevice {
    pub fn new(samples: &[bool]) -> Self {
        Self {
            samples: Mutex::new(samples.iter().copied().collect()),
            exhausted: Notify::new(),
        }
    }
}

impl DeviceMonitor for ScriptedDevice {
    fn is_present(&self) -> bool {
        let next = self.samples.lock().unwrap().pop_front();
        match next {
            Some(present) => present,
            None => {
                self.exhausted.notify_one();
                false
            }
        }
    }
}

/// Wiper that deletes the file and counts calls
#[derive(Default)]
pub struct CountingWiper {
    pub wipes: AtomicUsize,
    pub missing: bool,
}

impl CountingWiper {
    pub fn wipes(&self) -> usize {
        self.wipes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyWiper for CountingWiper {
    async fn check_available(&self) -> autosign_daemon::Result<()> {
        if self.missing {
            return Err(DaemonError::Precondition(
                "The 'wipe' utility must be installed before running this program".into(),
            ));
        }
        Ok(())
    }

    async fn wipe(&self, path: &Path) -> autosign_daemon::Result<()> {
        self.wipes.fetch_add(1, Ordering::SeqCst);
        std::fs::remove_file(path)?;
        Ok(())
    }
}

/// Unlocker that stalls until released, then opens the wallet for real
///
/// Gives up stalling after a few seconds so a blocked runtime still finishes.
#[derive(Default)]
pub struct StalledUnlocker {
    released: AtomicBool,
    /// Notified when an unlock starts
    pub entered: Notify,
}

impl StalledUnlocker {
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl WalletUnlocker for StalledUnlocker {
    fn unlock(&self, path: &Path, key: &KeyMaterial) -> Result<Wallet, WalletError> {
        self.entered.notify_one();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.released.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        SealedWalletUnlocker::default().unlock(path, key)
    }
}

/// Device and signing machine laid out under one temporary directory
pub struct Harness {
    pub root: TempDir,
    pub config: AutosignConfig,
    pub mount: Arc<ScriptedMount>,
    pub wiper: Arc<CountingWiper>,
    pub led: Arc<SimulatedLed>,
    pub unlocker: Arc<dyn WalletUnlocker>,
    pub key: KeyMaterial,
    pub addresses: Vec<String>,
}

impl Harness {
    /// Device with a key file and `wallets` local wallets sealed under it
    pub fn new(wallets: u8) -> Self {
        let root = TempDir::new().unwrap();
        let config = AutosignConfig {
            mountpoint: root.path().join("mnt"),
            wallet_dir: root.path().join("wallets"),
            label_dir: root.path().join("by-label"),
            insert_check: false,
            led: LedMode::On,
            poll_interval_ms: 5,
            ..Default::default()
        };
        std::fs::create_dir_all(config.tx_dir()).unwrap();
        std::fs::create_dir_all(&config.wallet_dir).unwrap();

        let key = KeyMaterial::generate();
        std::fs::write(config.key_path(), key.file_contents().as_bytes()).unwrap();

        let mut harness = Self {
            root,
            config,
            mount: Arc::new(ScriptedMount::default()),
            wiper: Arc::new(CountingWiper::default()),
            led: Arc::new(SimulatedLed::new()),
            unlocker: Arc::new(SealedWalletUnlocker::default()),
            key,
            addresses: Vec::new(),
        };
        for n in 1..=wallets {
            let key = KeyMaterial::parse(&harness.key.file_contents()).unwrap();
            harness.add_wallet([n; 32], &key);
        }
        harness
    }

    /// Seal `secret` under `key` into the wallet directory
    pub fn add_wallet(&mut self, secret: [u8; 32], key: &KeyMaterial) -> PathBuf {
        let sealed = seal_wallet(
            &secret,
            "Test Wallet",
            Network::Mainnet,
            key,
            DEFAULT_HASH_PRESET,
        )
        .unwrap();
        let path = self
            .config
            .wallet_dir
            .join(wallet_file_name(&secret).unwrap());
        std::fs::write(&path, sealed).unwrap();

        let wallet = SealedWalletUnlocker::default().unlock(&path, key).unwrap();
        self.addresses.push(wallet.address().to_string());
        path
    }

    pub fn tx_dir(&self) -> PathBuf {
        self.config.tx_dir()
    }

    /// Queue a transaction spending from wallet `wallet`
    pub fn write_raw(&self, base: &str, coin: &str, wallet: usize) {
        let tx = RawTx {
            version: TX_VERSION,
            coin: coin.to_string(),
            chain: Chain::Mainnet,
            inputs: vec![TxInput {
                address: self.addresses[wallet].clone(),
                amount: Amount(100_000),
            }],
            outputs: vec![
                TxOutput {
                    address: format!("external-{}", base),
                    amount: Amount(60_000),
                    wallet_label: None,
                },
                TxOutput {
                    address: self.addresses[wallet].clone(),
                    amount: Amount(39_000),
                    wallet_label: Some("Test Wallet".to_string()),
                },
            ],
            locktime: 0,
        };
        std::fs::write(
            self.tx_dir().join(format!("{}.rawtx", base)),
            serde_json::to_vec_pretty(&tx).unwrap(),
        )
        .unwrap();
    }

    pub fn write_garbage(&self, base: &str) {
        std::fs::write(self.tx_dir().join(format!("{}.rawtx", base)), b"not a tx").unwrap();
    }

    pub fn signed_path(&self, base: &str) -> PathBuf {
        self.tx_dir().join(format!("{}.sigtx", base))
    }

    pub fn signed_count(&self) -> usize {
        std::fs::read_dir(self.tx_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".sigtx"))
            .count()
    }

    /// Controller wired to the scripted backends, device always present
    pub fn autosigner(&self) -> Autosigner {
        self.autosigner_with(Arc::new(LabelMonitor::new("/unused").insert_check(false)))
    }

    pub fn autosigner_with(&self, monitor: Arc<dyn DeviceMonitor>) -> Autosigner {
        let parts = Collaborators {
            monitor,
            mount_ops: self.mount.clone(),
            wiper: self.wiper.clone(),
            unlocker: self.unlocker.clone(),
            signer: Arc::new(EcdsaTxSigner::new(["BTC"])),
            led: self.led.clone(),
        };
        Autosigner::new(self.config.clone(), parts).quiet(true)
    }
}

/// Setup seed source that records whether it was asked
pub fn recording_seed(
    asked: &Arc<AtomicBool>,
    seed: Option<[u8; 32]>,
) -> autosign_daemon::SeedPrompt {
    let asked = Arc::clone(asked);
    Box::new(move || {
        asked.store(true, Ordering::SeqCst);
        Ok(seed.map(zeroize::Zeroizing::new))
    })
}

/// Shutdown future that never fires
pub fn never() -> std::future::Pending<&'static str> {
    std::future::pending()
}
