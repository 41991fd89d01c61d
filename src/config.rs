//! Per-session device configuration
//!
//! A [DeviceConfig] is built once at the start of a flash session and never
//! changes while the session runs. Values that may vary per host platform,
//! such as the baud rate, are resolved to a single concrete value before the
//! config is constructed.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::chip::Chip;

/// Baud rate used when none is configured for the current platform
pub const DEFAULT_BAUD: u32 = 115_200;

/// Name of the script that is always uploaded, even when already present
pub const DEFAULT_ENTRY_POINT: &str = "main.py";

/// A baud rate as written in a configuration file
///
/// Either a plain number, or a table with one entry per host platform:
///
/// ```toml
/// baud = 921600
/// # or
/// baud = { windows = 115200, default = 921600 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Baud {
    Fixed(u32),
    PerPlatform(PlatformBaud),
}

/// Baud rates keyed by host platform
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformBaud {
    pub windows: Option<u32>,
    pub macos: Option<u32>,
    pub linux: Option<u32>,
    pub default: Option<u32>,
}

impl Baud {
    /// The baud rate to use on the platform this binary was built for
    pub fn resolve(&self) -> u32 {
        match self {
            Baud::Fixed(baud) => *baud,
            Baud::PerPlatform(table) => table
                .current()
                .or(table.default)
                .unwrap_or(DEFAULT_BAUD),
        }
    }
}

impl PlatformBaud {
    fn current(&self) -> Option<u32> {
        if cfg!(target_os = "windows") {
            self.windows
        } else if cfg!(target_os = "macos") {
            self.macos
        } else if cfg!(target_os = "linux") {
            self.linux
        } else {
            None
        }
    }
}

/// Locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// File transfer tool (`ls`, `fsi` and `put` sub-commands)
    pub transfer: PathBuf,
    /// Erase/write tool for the ESP family
    pub esptool: PathBuf,
    /// Board flashing tool for the K210 family
    pub kflash: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            transfer: PathBuf::from("mpfs"),
            esptool: PathBuf::from("esptool.py"),
            kflash: PathBuf::from("kflash"),
        }
    }
}

/// Everything a flash session needs to know about the target
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Chip family of the target
    pub chip: Chip,
    /// Serial port the board is attached to
    pub port: String,
    /// Firmware image written when the board has to be reflashed
    pub firmware: PathBuf,
    /// Board name passed to the K210 flashing tool
    pub board: Option<String>,
    /// Baud rate for firmware writes
    pub baud: u32,
    /// Toggle RTS/DTR to reset the board before talking to it
    pub reset: bool,
    /// Use the slow (more reliable) K210 flashing mode
    pub slow_mode: bool,
    /// Local directories whose files are uploaded next to the entry point
    pub libraries: Vec<PathBuf>,
    /// Directory the entry-point script is written to
    pub project_dir: PathBuf,
    /// File name of the entry-point script
    pub entry_point: String,
    pub tools: ToolPaths,
    /// Upper bound for a single tool invocation
    pub tool_timeout: Option<Duration>,
}

impl DeviceConfig {
    pub fn new(
        chip: Chip,
        port: impl Into<String>,
        firmware: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            chip,
            port: port.into(),
            firmware: firmware.into(),
            board: None,
            baud: DEFAULT_BAUD,
            reset: true,
            slow_mode: false,
            libraries: Vec::new(),
            project_dir: project_dir.into(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            tools: ToolPaths::default(),
            tool_timeout: None,
        }
    }

    /// Path of the entry-point script inside the project directory
    pub fn entry_point_path(&self) -> PathBuf {
        self.project_dir.join(&self.entry_point)
    }
}
