//! Upload MicroPython scripts to serial-attached boards
//!
//! `mpyflash` drives external command-line tools to look at the file system
//! of a board, upload the files that are missing, and reflash the firmware
//! when the board cannot be queried or its internal storage is full.
//!
//! The entry point is [Flasher], which runs a single session against a
//! [DeviceConfig]. All external tools are invoked through the [ToolRunner]
//! trait; [ProcessRunner] runs them as child processes.

pub use chip::Chip;
pub use config::DeviceConfig;
pub use error::{Error, ToolError};
pub use flasher::{CancelToken, FlashOutcome, Flasher};
pub use tool::{ProcessRunner, ToolRunner};

pub mod chip;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod flasher;
#[cfg(feature = "cli")]
pub mod logging;
pub mod progress;
pub mod space;
pub mod tool;
pub mod transfer;
