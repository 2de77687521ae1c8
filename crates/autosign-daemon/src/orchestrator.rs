//! Signing pass orchestration
//!
//! [`Autosigner`] composes the collaborators into the four commands:
//! a single signing pass, the unattended wait loop, key generation and setup.
//! Every command runs raced against a shutdown future; whichever finishes
//! first, the device is unmounted and the light turned off on the way out.

use std::future::Future;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autosign_core::{
    batch::BatchResult,
    queue, summary,
    wallet::{list_wallet_files, unlock_all},
    BatchSigner, EcdsaTxSigner, KeyMaterial, SealedWalletUnlocker, SummaryMode, TxSigner,
    WalletSet, WalletUnlocker,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::config::{AutosignConfig, LedMode};
use crate::device::{DeviceMonitor, LabelMonitor};
use crate::error::{DaemonError, Result};
use crate::indicator::{self, Indicator, IndicatorState, LedDriver};
use crate::mount::{MountManager, MountOps, SystemMountOps};
use crate::provision::{
    create_wallet_dir, random_secret, remove_wallet_dir, write_wallet, KeyProvisioner, KeyWiper,
    SeedPrompt, SystemWiper,
};

/// Ticks between redraws of the "Waiting" prompt
const WAITING_REDRAW: u64 = 10;

/// What the process was asked to do
pub enum RunMode {
    /// One signing pass
    Sign,
    /// Sign on every device insertion until terminated
    Wait,
    /// Provision a new key file on the device
    GenKey,
    /// Provision a key file and a fresh local wallet
    Setup { seed: SeedPrompt },
}

/// The pluggable parts of the controller
pub struct Collaborators {
    pub monitor: Arc<dyn DeviceMonitor>,
    pub mount_ops: Arc<dyn MountOps>,
    pub wiper: Arc<dyn KeyWiper>,
    pub unlocker: Arc<dyn WalletUnlocker>,
    pub signer: Arc<dyn TxSigner>,
    pub led: Arc<dyn LedDriver>,
}

impl Collaborators {
    /// Real device, mount, wipe and LED backends for `config`
    pub fn system(config: &AutosignConfig) -> Result<Self> {
        Ok(Self {
            monitor: Arc::new(
                LabelMonitor::new(config.device_marker()).insert_check(config.insert_check),
            ),
            mount_ops: Arc::new(SystemMountOps::new().use_sudo(config.use_sudo)),
            wiper: Arc::new(SystemWiper),
            unlocker: Arc::new(SealedWalletUnlocker::default()),
            signer: Arc::new(EcdsaTxSigner::new(config.enabled_coins())),
            led: indicator::driver_for(config)?,
        })
    }
}

/// Rising-edge detector over device presence samples
#[derive(Debug, Default)]
pub struct PresenceEdge {
    previous: bool,
}

impl PresenceEdge {
    /// Record a sample; true only when the device just appeared
    pub fn update(&mut self, present: bool) -> bool {
        let rising = present && !self.previous;
        self.previous = present;
        rising
    }
}

/// Output for tick `n` of the wait loop
pub fn ticker_frame(n: u64) -> String {
    if n % WAITING_REDRAW == 0 {
        format!("\r{:17}\rWaiting.", "")
    } else {
        ".".to_string()
    }
}

enum PassOutcome {
    /// Wallets did not unlock; the queue was not touched
    Locked,
    /// Batch processed; true when nothing failed
    Finished(bool),
}

/// The signing controller
pub struct Autosigner {
    config: AutosignConfig,
    monitor: Arc<dyn DeviceMonitor>,
    mounts: MountManager,
    provisioner: KeyProvisioner,
    unlocker: Arc<dyn WalletUnlocker>,
    signer: Arc<dyn TxSigner>,
    indicator: Indicator,
    summary: SummaryMode,
    quiet: bool,
}

impl Autosigner {
    pub fn new(config: AutosignConfig, parts: Collaborators) -> Self {
        let mounts = MountManager::new(parts.mount_ops, &config.mountpoint, config.tx_dir());
        let provisioner = KeyProvisioner::new(parts.wiper, config.key_path());
        let indicator = Indicator::new(parts.led, config.led == LedMode::Stealth);
        let summary = config.summary.into();

        Self {
            config,
            monitor: parts.monitor,
            mounts,
            provisioner,
            unlocker: parts.unlocker,
            signer: parts.signer,
            indicator,
            summary,
            quiet: false,
        }
    }

    /// Suppress the wait loop ticker
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn indicator_state(&self) -> IndicatorState {
        self.indicator.state()
    }

    /// Run `mode` until it completes or `shutdown` resolves
    ///
    /// Returns whether every transaction signed. Interruption is reported as
    /// [`DaemonError::Interrupted`].
    pub async fn run<F>(&mut self, mode: RunMode, shutdown: F) -> Result<bool>
    where
        F: Future<Output = &'static str>,
    {
        let result = tokio::select! {
            biased;
            signal = shutdown => {
                info!("Cleaning up...");
                Err(DaemonError::Interrupted(signal))
            }
            result = self.execute(mode) => result,
        };
        self.cleanup().await;
        result
    }

    async fn execute(&mut self, mode: RunMode) -> Result<bool> {
        self.provisioner.check_wiper().await?;

        match mode {
            RunMode::GenKey => {
                self.gen_key(false).await?;
                Ok(true)
            }
            RunMode::Setup { seed } => {
                self.setup(seed).await?;
                Ok(true)
            }
            RunMode::Sign => {
                let wallet_files = self.wallet_files()?;
                self.do_sign(&wallet_files).await
            }
            RunMode::Wait => {
                let wallet_files = self.wallet_files()?;
                self.wait_loop(&wallet_files).await
            }
        }
    }

    async fn cleanup(&mut self) {
        self.release().await;
        self.indicator.shutdown();
    }

    /// Unmount at the end of a command; a failure is only reported
    async fn release(&self) {
        if let Err(e) = self.mounts.unmount().await {
            warn!("Unmount failed: {}", e);
        }
    }

    /// Sealed wallets in the local wallet directory; at least one is required
    pub fn wallet_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.wallet_dir;
        let files = list_wallet_files(dir).map_err(|e| {
            DaemonError::Precondition(format!(
                "Cannot open wallet directory '{}' ({}). Did you run 'autosign setup'?",
                dir.display(),
                e
            ))
        })?;

        if files.is_empty() {
            return Err(DaemonError::Precondition(
                "No wallet files present!".to_string(),
            ));
        }
        Ok(files)
    }

    /// One signing pass: mount, unlock, sign, unmount
    ///
    /// The device is unmounted on every return path. Returns true only when
    /// the wallets unlocked and no transaction failed.
    pub async fn do_sign(&mut self, wallet_files: &[PathBuf]) -> Result<bool> {
        self.indicator.pass_started();

        let pass = self.sign_mounted(wallet_files).await;
        self.release().await;

        match pass {
            Ok(PassOutcome::Locked) => {
                self.indicator.unlock_failed();
                Ok(false)
            }
            Ok(PassOutcome::Finished(success)) => {
                self.indicator.pass_finished(success);
                Ok(success)
            }
            Err(e) => {
                self.indicator.fault();
                Err(e)
            }
        }
    }

    async fn sign_mounted(&mut self, wallet_files: &[PathBuf]) -> Result<PassOutcome> {
        self.mounts.mount().await?;

        let wallets = match self.unlock(wallet_files).await? {
            Some(wallets) => wallets,
            None => {
                println!("Password is incorrect!");
                return Ok(PassOutcome::Locked);
            }
        };
        self.indicator.unlocked();

        let success = self.sign_queue(&wallets).await?;
        Ok(PassOutcome::Finished(success))
    }

    /// Unlock every wallet with the device key, or none
    ///
    /// Key derivation runs on the blocking pool so a shutdown signal is not
    /// held up by it.
    async fn unlock(&self, wallet_files: &[PathBuf]) -> Result<Option<WalletSet>> {
        let key_path = self.config.key_path();
        println!(
            "Unlocking wallet{} with key from '{}'",
            if wallet_files.len() == 1 { "" } else { "s" },
            key_path.display()
        );

        let key = match KeyMaterial::load(&key_path) {
            Ok(key) => key,
            Err(e) => {
                warn!("{}", e);
                return Ok(None);
            }
        };

        let unlocker = Arc::clone(&self.unlocker);
        let paths = wallet_files.to_vec();
        let unlocked =
            tokio::task::spawn_blocking(move || unlock_all(unlocker.as_ref(), &paths, &key))
                .await
                .map_err(|e| DaemonError::Task(e.to_string()))?;
        Ok(unlocked.ok())
    }

    async fn sign_queue(&self, wallets: &WalletSet) -> Result<bool> {
        let tx_dir = self.mounts.tx_dir();
        let pending = queue::scan(tx_dir)?;

        if pending.is_empty() {
            println!("No unsigned transactions");
            return Ok(true);
        }

        let result = BatchSigner::new(tx_dir, self.signer.as_ref(), wallets)
            .sign_all(&pending)
            .await?;

        self.report(&result);
        Ok(result.is_success())
    }

    fn report(&self, result: &BatchResult) {
        println!("{}", result.report());
        if let Some(text) = summary::render(&result.signed, self.summary) {
            println!("{}", text);
        }
        if let Some(listing) = result.failure_listing() {
            println!("\n{}\n", listing);
        }
    }

    /// Poll for the device and sign on every insertion; never returns Ok
    async fn wait_loop(&mut self, wallet_files: &[PathBuf]) -> Result<bool> {
        self.indicator.idle();

        let mut edge = PresenceEdge::default();
        let mut ticks = 0u64;
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if edge.update(self.monitor.is_present()) {
                info!("Device insertion detected");
                if let Err(e) = self.do_sign(wallet_files).await {
                    error!("Signing pass failed: {}", e);
                }
            }

            if !self.quiet {
                let mut stderr = std::io::stderr();
                let _ = stderr.write_all(ticker_frame(ticks).as_bytes());
                let _ = stderr.flush();
            }
            ticks += 1;
        }
    }

    /// Write a new key file to the device
    ///
    /// With `keep_mounted` the device stays mounted for the caller.
    async fn gen_key(&mut self, keep_mounted: bool) -> Result<KeyMaterial> {
        create_wallet_dir(&self.config.wallet_dir)?;

        if !self.monitor.is_present() {
            return Err(DaemonError::DeviceNotPresent);
        }

        self.mounts.mount().await?;
        let key = self.provisioner.provision().await?;

        if !keep_mounted {
            self.release().await;
        }
        Ok(key)
    }

    /// Fresh key file plus a fresh wallet sealed under it
    ///
    /// The seed is asked for only after the device has been provisioned.
    async fn setup(&mut self, seed: SeedPrompt) -> Result<()> {
        remove_wallet_dir(&self.config.wallet_dir);

        let key = self.gen_key(true).await?;
        let seed = tokio::task::spawn_blocking(seed)
            .await
            .map_err(|e| DaemonError::Task(e.to_string()))??;
        let secret: Zeroizing<[u8; 32]> = seed.unwrap_or_else(random_secret);
        write_wallet(&self.config.wallet_dir, &secret, &key)?;

        self.release().await;
        Ok(())
    }
}
