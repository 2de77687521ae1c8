//! Autosign Daemon - air-gapped signing controller
//!
//! This crate provides:
//! - Removable device detection by partition label
//! - Mount lifecycle with transaction directory validation
//! - Key file provisioning with secure erase
//! - Status LED state machine with stealth mode
//! - Termination signal handling
//! - The signing pass and unattended wait loop

pub mod config;
pub mod device;
pub mod error;
pub mod indicator;
pub mod lifecycle;
pub mod mount;
pub mod orchestrator;
pub mod provision;

pub use config::{AutosignConfig, LedMode, SummaryChoice};
pub use device::{DeviceMonitor, LabelMonitor};
pub use error::{DaemonError, Result};
pub use indicator::{Indicator, IndicatorState, LedDriver, SimulatedLed};
pub use lifecycle::SignalGuard;
pub use mount::{MountManager, MountOps, SystemMountOps};
pub use orchestrator::{Autosigner, Collaborators, PresenceEdge, RunMode};
pub use provision::{KeyProvisioner, KeyWiper, SeedPrompt, SystemWiper};
