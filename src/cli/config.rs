//! Command-line interface configuration
//!
//! Settings are read from `mpyflash.toml` in the current directory, or, when
//! there is none, from the user's configuration directory. Command-line
//! arguments always take precedence over the file.
//!
//! ```toml
//! [connection]
//! serial = "/dev/ttyUSB0"
//!
//! [project]
//! chip = "esp32"
//! firmware = "firmware/esp32.bin"
//! baud = { windows = 115200, default = 921600 }
//! libraries = ["lib"]
//!
//! [tools]
//! transfer = "/opt/tools/mpfs"
//! timeout = 120
//! ```

use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Deserialize;

use crate::config::Baud;

const CONFIG_FILE: &str = "mpyflash.toml";

/// A configured serial connection
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Connection {
    /// Name of the serial port used for communication
    pub serial: Option<String>,
}

/// Target and upload settings
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub chip: Option<String>,
    pub board: Option<String>,
    pub baud: Option<Baud>,
    pub firmware: Option<PathBuf>,
    pub libraries: Vec<PathBuf>,
    /// Toggle RTS/DTR before talking to the board
    pub reset: Option<bool>,
    pub slow: bool,
    /// Directory the entry-point script is written to
    pub dir: Option<PathBuf>,
    pub entry_point: Option<String>,
}

/// Paths of the external tools
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub transfer: Option<PathBuf>,
    pub esptool: Option<PathBuf>,
    pub kflash: Option<PathBuf>,
    /// Seconds a single tool invocation may take
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub connection: Connection,
    pub project: ProjectConfig,
    pub tools: ToolConfig,
}

impl Config {
    /// Load the configuration file, if there is one
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&raw)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;
        debug!("Config from {}: {:#?}", path.display(), config);

        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn config_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }

        ProjectDirs::from("rs", "mpyflash", "mpyflash")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.is_file())
    }
}
