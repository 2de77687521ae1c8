//! Status indicator
//!
//! [`Indicator`] decides which state to show; a [`LedDriver`] shows it. Stealth
//! mode keeps the light dark until the wallets have unlocked, so an observer
//! cannot tell when a device was inserted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AutosignConfig, LedMode};
use crate::error::{DaemonError, Result};

/// Sysfs LED class directory
pub const SYSFS_LEDS: &str = "/sys/class/leds";

/// What the status light shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndicatorState {
    #[default]
    Off,
    Standby,
    Busy,
    Error,
}

impl IndicatorState {
    pub fn name(&self) -> &'static str {
        match self {
            IndicatorState::Off => "off",
            IndicatorState::Standby => "standby",
            IndicatorState::Busy => "busy",
            IndicatorState::Error => "error",
        }
    }
}

impl std::fmt::Display for IndicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives a physical or simulated light
pub trait LedDriver: Send + Sync {
    fn set(&self, state: IndicatorState);

    /// Turn the light off for good
    fn shutdown(&self) {
        self.set(IndicatorState::Off);
    }
}

/// No light at all
#[derive(Debug, Default)]
pub struct NoLed;

impl LedDriver for NoLed {
    fn set(&self, _state: IndicatorState) {}
}

/// Logs and records state changes instead of driving hardware
#[derive(Debug, Default)]
pub struct SimulatedLed {
    history: Mutex<Vec<IndicatorState>>,
}

impl SimulatedLed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state set so far, oldest first
    pub fn history(&self) -> Vec<IndicatorState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<IndicatorState> {
        self.history().last().copied()
    }
}

impl LedDriver for SimulatedLed {
    fn set(&self, state: IndicatorState) {
        info!("LED: {}", state);
        if let Ok(mut history) = self.history.lock() {
            history.push(state);
        }
    }
}

/// Supported boards and their sysfs LED
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedBoard {
    pub name: &'static str,
    pub brightness: PathBuf,
    /// Trigger to clear before the LED can be driven by hand
    pub trigger: Option<PathBuf>,
}

const BOARDS: &[(&str, &str, bool)] = &[
    ("Orange Pi", "orangepi:red:status", false),
    ("Raspberry Pi", "led0", true),
];

impl LedBoard {
    /// First supported LED found under `leds_dir`
    pub fn detect(leds_dir: &Path) -> Option<Self> {
        BOARDS.iter().find_map(|&(name, led, has_trigger)| {
            let dir = leds_dir.join(led);
            let brightness = dir.join("brightness");
            brightness.exists().then(|| LedBoard {
                name,
                brightness,
                trigger: has_trigger.then(|| dir.join("trigger")),
            })
        })
    }
}

/// Blink timing for a state: `None` is steady off, otherwise (on, off)
pub fn blink_pattern(state: IndicatorState) -> Option<(Duration, Duration)> {
    match state {
        IndicatorState::Off => None,
        IndicatorState::Standby => Some((Duration::from_millis(100), Duration::from_millis(1900))),
        IndicatorState::Busy => Some((Duration::from_millis(60), Duration::from_millis(60))),
        IndicatorState::Error => Some((Duration::from_millis(500), Duration::from_millis(500))),
    }
}

/// Blinks a sysfs LED from a background task
pub struct SysfsLed {
    board: LedBoard,
    tx: watch::Sender<IndicatorState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SysfsLed {
    /// Take control of the board LED; must be called inside a tokio runtime
    pub fn start(board: LedBoard) -> Result<Self> {
        if let Some(trigger) = &board.trigger {
            std::fs::write(trigger, "none")
                .map_err(|e| DaemonError::Led(format!("{}: {}", trigger.display(), e)))?;
        }
        write_brightness(&board.brightness, false)
            .map_err(|e| DaemonError::Led(format!("{}: {}", board.brightness.display(), e)))?;

        info!("Driving {} status LED", board.name);
        let (tx, rx) = watch::channel(IndicatorState::Off);
        let task = tokio::spawn(blink(board.brightness.clone(), rx));

        Ok(Self {
            board,
            tx,
            task: Mutex::new(Some(task)),
        })
    }
}

impl LedDriver for SysfsLed {
    fn set(&self, state: IndicatorState) {
        debug!("LED: {}", state);
        self.tx.send_replace(state);
    }

    fn shutdown(&self) {
        self.tx.send_replace(IndicatorState::Off);
        if let Some(task) = self.task.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
        if let Err(e) = write_brightness(&self.board.brightness, false) {
            warn!("Could not turn off LED: {}", e);
        }
    }
}

fn write_brightness(path: &Path, on: bool) -> std::io::Result<()> {
    std::fs::write(path, if on { "1" } else { "0" })
}

enum Wake {
    Elapsed,
    Changed,
    Closed,
}

async fn hold(rx: &mut watch::Receiver<IndicatorState>, period: Duration) -> Wake {
    tokio::select! {
        changed = rx.changed() => match changed {
            Ok(()) => Wake::Changed,
            Err(_) => Wake::Closed,
        },
        _ = tokio::time::sleep(period) => Wake::Elapsed,
    }
}

async fn blink(brightness: PathBuf, mut rx: watch::Receiver<IndicatorState>) {
    'states: loop {
        let state = *rx.borrow_and_update();
        match blink_pattern(state) {
            None => {
                let _ = write_brightness(&brightness, false);
                if rx.changed().await.is_err() {
                    break;
                }
            }
            Some((on, off)) => loop {
                let _ = write_brightness(&brightness, true);
                match hold(&mut rx, on).await {
                    Wake::Elapsed => {}
                    Wake::Changed => continue 'states,
                    Wake::Closed => break 'states,
                }
                let _ = write_brightness(&brightness, false);
                match hold(&mut rx, off).await {
                    Wake::Elapsed => {}
                    Wake::Changed => continue 'states,
                    Wake::Closed => break 'states,
                }
            },
        }
    }
    let _ = write_brightness(&brightness, false);
}

/// Pick the LED driver for `config`
///
/// Simulation wins over hardware. Asking for the LED on a board without one is
/// a precondition failure.
pub fn driver_for(config: &AutosignConfig) -> Result<Arc<dyn LedDriver>> {
    if config.simulate_led {
        return Ok(Arc::new(SimulatedLed::new()));
    }
    if config.led == LedMode::Off {
        return Ok(Arc::new(NoLed));
    }
    match LedBoard::detect(Path::new(SYSFS_LEDS)) {
        Some(board) => Ok(Arc::new(SysfsLed::start(board)?)),
        None => Err(DaemonError::Precondition(
            "Status LED requested but no supported LED was found".to_string(),
        )),
    }
}

/// Indicator state machine
pub struct Indicator {
    driver: Arc<dyn LedDriver>,
    stealth: bool,
    state: IndicatorState,
}

impl Indicator {
    pub fn new(driver: Arc<dyn LedDriver>, stealth: bool) -> Self {
        Self {
            driver,
            stealth,
            state: IndicatorState::Off,
        }
    }

    pub fn state(&self) -> IndicatorState {
        self.state
    }

    fn set(&mut self, state: IndicatorState) {
        self.state = state;
        self.driver.set(state);
    }

    /// Waiting for a device
    pub fn idle(&mut self) {
        if !self.stealth {
            self.set(IndicatorState::Standby);
        }
    }

    /// A signing pass begins, wallets still locked
    pub fn pass_started(&mut self) {
        if !self.stealth {
            self.set(IndicatorState::Busy);
        }
    }

    /// Wallets unlocked
    pub fn unlocked(&mut self) {
        if self.stealth {
            self.set(IndicatorState::Busy);
        }
    }

    /// Wallets failed to unlock
    pub fn unlock_failed(&mut self) {
        if !self.stealth {
            self.set(IndicatorState::Error);
        }
    }

    /// Pass ended with the wallets unlocked
    pub fn pass_finished(&mut self, success: bool) {
        let state = match (success, self.stealth) {
            (false, _) => IndicatorState::Error,
            (true, false) => IndicatorState::Standby,
            (true, true) => IndicatorState::Off,
        };
        self.set(state);
    }

    /// Pass aborted by a fault
    ///
    /// In stealth mode the error only shows once the light is already revealed.
    pub fn fault(&mut self) {
        if !self.stealth || self.state != IndicatorState::Off {
            self.set(IndicatorState::Error);
        }
    }

    /// Process is exiting
    pub fn shutdown(&mut self) {
        self.state = IndicatorState::Off;
        self.driver.shutdown();
    }
}
