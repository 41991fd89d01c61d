//! Command-line interface
//!
//! No stability guaranties apply

use std::{fs, path::PathBuf, time::Duration};

use clap::Args;
use crossterm::style::Stylize;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};

use self::config::Config;
use crate::{
    chip::{Chip, FirmwareFlasher},
    config::{DeviceConfig, ToolPaths},
    error::Error,
    filesystem::{resolve_root, Probe},
    flasher::{CancelToken, FlashOutcome, Flasher},
    progress::{HostChannel, ProgressSink},
    tool::ProcessRunner,
};

pub mod config;

/// Options for reaching the board
#[derive(Debug, Args, Clone, Default)]
#[non_exhaustive]
pub struct ConnectArgs {
    /// Serial port connected to the board
    #[arg(short = 'p', long, env = "MPYFLASH_PORT")]
    pub port: Option<String>,
    /// Chip family of the board
    #[arg(short = 'c', long)]
    pub chip: Option<String>,
    /// Do not toggle RTS/DTR to reset the board
    #[arg(long)]
    pub no_reset: bool,
}

/// Options for reflashing the firmware
#[derive(Debug, Args, Clone, Default)]
#[non_exhaustive]
pub struct FirmwareArgs {
    /// Firmware image written when the board has to be reflashed
    #[arg(short = 'f', long)]
    pub firmware: Option<PathBuf>,
    /// Baud rate for writing the firmware
    #[arg(short = 'b', long)]
    pub baud: Option<u32>,
    /// Board name, required for K210 boards
    #[arg(short = 'B', long)]
    pub board: Option<String>,
    /// Use the slower, more reliable K210 flashing mode
    #[arg(long)]
    pub slow: bool,
}

/// Options for the upload itself
#[derive(Debug, Args, Clone)]
#[non_exhaustive]
pub struct FlashArgs {
    /// Script that becomes the entry point on the board
    pub source: PathBuf,
    /// Directories whose files are uploaded alongside the script
    #[arg(short = 'l', long = "lib")]
    pub libraries: Vec<PathBuf>,
    /// Local directory the entry-point script is written to
    #[arg(long)]
    pub project_dir: Option<PathBuf>,
}

/// Combine command-line arguments and the configuration file into the
/// configuration of a session
pub fn device_config(
    connect: &ConnectArgs,
    firmware: &FirmwareArgs,
    config: &Config,
) -> Result<DeviceConfig, Error> {
    let project = &config.project;

    let chip = connect
        .chip
        .as_deref()
        .or(project.chip.as_deref())
        .ok_or(Error::MissingConfig("chip"))?;
    let chip = Chip::from_name(chip)?;

    let port = connect
        .port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .ok_or(Error::MissingConfig("serial port"))?;

    let firmware_path = firmware
        .firmware
        .clone()
        .or_else(|| project.firmware.clone())
        .unwrap_or_else(|| PathBuf::from(format!("{chip}.bin")));

    let project_dir = project.dir.clone().unwrap_or_else(default_project_dir);

    let mut device = DeviceConfig::new(chip, port, firmware_path, project_dir);
    device.board = firmware.board.clone().or_else(|| project.board.clone());
    if let Some(baud) = firmware.baud.or(project.baud.map(|baud| baud.resolve())) {
        device.baud = baud;
    }
    device.reset = !connect.no_reset && project.reset.unwrap_or(true);
    device.slow_mode = firmware.slow || project.slow;
    device.libraries = project.libraries.clone();
    if let Some(entry_point) = &project.entry_point {
        device.entry_point = entry_point.clone();
    }

    let defaults = ToolPaths::default();
    let tools = &config.tools;
    device.tools = ToolPaths {
        transfer: tools.transfer.clone().unwrap_or(defaults.transfer),
        esptool: tools.esptool.clone().unwrap_or(defaults.esptool),
        kflash: tools.kflash.clone().unwrap_or(defaults.kflash),
    };
    device.tool_timeout = tools.timeout.map(Duration::from_secs);

    debug!("Device config: {:#?}", device);
    Ok(device)
}

fn default_project_dir() -> PathBuf {
    std::env::temp_dir().join("mpyflash")
}

fn runner(config: &DeviceConfig) -> ProcessRunner {
    match config.tool_timeout {
        Some(timeout) => ProcessRunner::with_timeout(timeout),
        None => ProcessRunner::new(),
    }
}

/// Prints progress to the terminal
#[derive(Debug, Default)]
pub struct TerminalProgress {
    /// Also print the raw output of the tools
    pub verbose: bool,
}

impl ProgressSink for TerminalProgress {
    fn status(&mut self, line: &str) {
        println!("{line}");
    }

    fn warning(&mut self, line: &str) {
        println!("{} {line}", "Warning:".yellow().bold());
    }

    fn tool_output(&mut self, line: &str) {
        if self.verbose {
            println!("    {}", line.dark_grey());
        }
    }

    fn success(&mut self, line: &str) {
        println!("{}", line.green().bold());
    }
}

/// The terminal has no abort button, Ctrl-C is always available
#[derive(Debug, Default)]
pub struct TerminalHost;

impl HostChannel for TerminalHost {
    fn set_abort_enabled(&mut self, enabled: bool) {
        debug!("Ctrl-C {}", if enabled { "aborts the upload" } else { "is not safe now" });
    }
}

/// Cancel `token` when Ctrl-C is pressed
pub fn cancel_on_ctrlc(token: &CancelToken) -> Result<()> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("Aborting after the current step...");
        token.cancel();
    })
    .into_diagnostic()
    .wrap_err("Failed to install the Ctrl-C handler")
}

/// Upload a script, reflashing the firmware when needed
pub fn flash(
    args: &FlashArgs,
    connect: &ConnectArgs,
    firmware: &FirmwareArgs,
    config: &Config,
    verbose: bool,
) -> Result<FlashOutcome> {
    let mut device = device_config(connect, firmware, config)?;
    device.libraries.extend(args.libraries.iter().cloned());
    if let Some(dir) = &args.project_dir {
        device.project_dir = dir.clone();
    }

    let source = fs::read_to_string(&args.source)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", args.source.display()))?;

    let cancel = CancelToken::new();
    cancel_on_ctrlc(&cancel)?;

    let mut runner = runner(&device);
    let mut progress = TerminalProgress { verbose };
    let mut host = TerminalHost;

    let outcome =
        Flasher::new(&device, &mut runner, &mut progress, &mut host, cancel).flash(&source)?;

    Ok(outcome)
}

/// Print the files stored on the board
pub fn list(path: Option<&str>, connect: &ConnectArgs, config: &Config) -> Result<()> {
    let device = device_config(connect, &FirmwareArgs::default(), config)?;
    let mut runner = runner(&device);
    let probe = Probe::new(&device);

    let path = match path {
        Some(path) => path.to_string(),
        None => {
            let root = resolve_root(&probe.list_files(&mut runner, "/")?);
            root.as_path().to_string()
        }
    };

    println!("{}", path.as_str().bold());
    for file in probe.list_files(&mut runner, &path)? {
        if !file.is_empty() {
            println!("  {file}");
        }
    }

    Ok(())
}

/// Print the free space of the board's file system
pub fn free(path: &str, connect: &ConnectArgs, config: &Config) -> Result<()> {
    let device = device_config(connect, &FirmwareArgs::default(), config)?;
    let mut runner = runner(&device);

    let report = Probe::new(&device).free_space(&mut runner, path)?;
    println!(
        "{}: {} blocks of {} bytes free ({} bytes)",
        path.bold(),
        report.bfree,
        report.bsize,
        report.free_bytes()
    );

    Ok(())
}

/// Reflash the firmware without uploading anything
pub fn reflash(
    connect: &ConnectArgs,
    firmware: &FirmwareArgs,
    config: &Config,
    verbose: bool,
) -> Result<()> {
    let device = device_config(connect, firmware, config)?;
    let mut runner = runner(&device);
    let mut progress = TerminalProgress { verbose };

    FirmwareFlasher::new(&device).flash(&mut runner, &mut progress)?;
    progress.success("Firmware flashed");

    Ok(())
}
