//! Removable device detection
//!
//! The device is present when its labelled partition shows up under the
//! label directory. Detection is a single `stat`, cheap enough to poll.

use std::path::PathBuf;

use tracing::trace;

/// Answers whether the removable device is inserted
pub trait DeviceMonitor: Send + Sync {
    fn is_present(&self) -> bool;
}

/// Checks for a partition label marker such as `/dev/disk/by-label/AUTOSIGN_TX`
#[derive(Debug, Clone)]
pub struct LabelMonitor {
    marker: PathBuf,
    insert_check: bool,
}

impl LabelMonitor {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            insert_check: true,
        }
    }

    /// With the insertion check disabled the device is always reported present
    pub fn insert_check(mut self, enabled: bool) -> Self {
        self.insert_check = enabled;
        self
    }
}

impl DeviceMonitor for LabelMonitor {
    fn is_present(&self) -> bool {
        if !self.insert_check {
            return true;
        }
        let present = std::fs::metadata(&self.marker).is_ok();
        trace!("Device marker {:?} present: {}", self.marker, present);
        present
    }
}
