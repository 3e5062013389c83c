use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;
use crate::pins::{Board, NumberingMode};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_EVENT_WAIT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GpioConfig {
    pub board: Board,
    /// Numbering mode applied at construction; otherwise `set_numbering_mode` must be called.
    pub mode: Option<NumberingMode>,
    pub sysfs_root: PathBuf,
    pub warnings: bool,
    /// Upper bound on how long a watcher sleeps before rechecking cancellation.
    pub event_wait_timeout_ms: u64,
    pub broadcast_capacity: usize,
    pub event_history_capacity: usize,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            board: Board::Rock64,
            mode: None,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            warnings: false,
            event_wait_timeout_ms: DEFAULT_EVENT_WAIT_TIMEOUT_MS,
            broadcast_capacity: 64,
            event_history_capacity: 32,
        }
    }
}

impl GpioConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, GpioError> {
        serde_json::from_str(contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}
