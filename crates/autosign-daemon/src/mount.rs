//! Mount lifecycle of the removable device
//!
//! The device is expected to have an fstab entry for the mountpoint, so
//! mounting is `mount <mountpoint>`. Both directions are idempotent: mounting
//! a mounted device and unmounting an unmounted one are no-ops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, Result};

/// Kernel mount table
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// OS-level mount operations
#[async_trait]
pub trait MountOps: Send + Sync {
    async fn is_mounted(&self, mountpoint: &Path) -> Result<bool>;
    async fn mount(&self, mountpoint: &Path) -> Result<()>;
    async fn sync(&self) -> Result<()>;
    async fn unmount(&self, mountpoint: &Path) -> Result<()>;
}

/// Mount operations through the system `mount`, `umount` and `sync` utilities
#[derive(Debug, Clone, Default)]
pub struct SystemMountOps {
    use_sudo: bool,
}

impl SystemMountOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to use sudo for mount operations
    pub fn use_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    fn command(&self, program: &str) -> Command {
        if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(program);
            c
        } else {
            Command::new(program)
        }
    }

    async fn run(&self, mut cmd: Command, what: &str) -> Result<()> {
        let output = cmd
            .output()
            .await
            .map_err(|e| DaemonError::Mount(format!("Failed to execute {}: {}", what, e)))?;

        if !output.status.success() {
            return Err(DaemonError::Mount(format!(
                "{} failed: {}",
                what,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MountOps for SystemMountOps {
    async fn is_mounted(&self, mountpoint: &Path) -> Result<bool> {
        let table = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        Ok(table_contains(&table, mountpoint))
    }

    async fn mount(&self, mountpoint: &Path) -> Result<()> {
        let mut cmd = self.command("mount");
        cmd.arg(mountpoint);
        self.run(cmd, "mount").await
    }

    async fn sync(&self) -> Result<()> {
        self.run(Command::new("sync"), "sync").await
    }

    async fn unmount(&self, mountpoint: &Path) -> Result<()> {
        let mut cmd = self.command("umount");
        cmd.arg(mountpoint);
        self.run(cmd, "umount").await
    }
}

/// Whether a `/proc/mounts` style table lists `mountpoint` as a mount target
pub fn table_contains(table: &str, mountpoint: &Path) -> bool {
    let wanted = mountpoint.to_string_lossy();
    let wanted = match wanted.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| unescape_mount_field(target) == wanted)
}

/// Undo the octal escapes (`\040` for space and friends) used in mount tables
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Owns the mountpoint for the controller
#[derive(Clone)]
pub struct MountManager {
    ops: Arc<dyn MountOps>,
    mountpoint: PathBuf,
    tx_dir: PathBuf,
}

impl MountManager {
    pub fn new(
        ops: Arc<dyn MountOps>,
        mountpoint: impl Into<PathBuf>,
        tx_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ops,
            mountpoint: mountpoint.into(),
            tx_dir: tx_dir.into(),
        }
    }

    pub fn tx_dir(&self) -> &Path {
        &self.tx_dir
    }

    pub async fn is_mounted(&self) -> Result<bool> {
        self.ops.is_mounted(&self.mountpoint).await
    }

    /// Mount the device if needed, then validate the transaction directory
    ///
    /// A failing mount command is not fatal by itself (the directory may
    /// already be usable); a transaction directory that is missing or not
    /// read/write for this user is.
    pub async fn mount(&self) -> Result<()> {
        if self.is_mounted().await? {
            debug!("{:?} already mounted", self.mountpoint);
        } else {
            match self.ops.mount(&self.mountpoint).await {
                Ok(()) => info!("Mounting {}", self.mountpoint.display()),
                Err(e) => warn!("{}", e),
            }
        }
        validate_tx_dir(&self.tx_dir)
    }

    /// Flush and unmount the device if it is mounted
    pub async fn unmount(&self) -> Result<()> {
        if !self.is_mounted().await? {
            return Ok(());
        }
        self.ops.sync().await?;
        info!("Unmounting {}", self.mountpoint.display());
        self.ops.unmount(&self.mountpoint).await
    }
}

/// The transaction directory must be a directory this user can list and
/// create files in
pub fn validate_tx_dir(tx_dir: &Path) -> Result<()> {
    let fail = |why: String| {
        debug!("{}: {}", tx_dir.display(), why);
        DaemonError::TxDir(tx_dir.display().to_string())
    };

    let meta = std::fs::metadata(tx_dir).map_err(|e| fail(e.to_string()))?;
    if !meta.is_dir() {
        return Err(fail("not a directory".to_string()));
    }

    std::fs::read_dir(tx_dir).map_err(|e| fail(format!("not readable: {}", e)))?;

    // removed again on drop
    tempfile::Builder::new()
        .prefix(".autosign-")
        .tempfile_in(tx_dir)
        .map_err(|e| fail(format!("not writable: {}", e)))?;

    Ok(())
}
