//! Library and application errors

use std::{io, path::PathBuf, time::Duration};

use miette::Diagnostic;
use strum::VariantNames;
use thiserror::Error;

use crate::{chip::Chip, filesystem::StorageRoot};

/// All possible errors returned by mpyflash
///
/// A user-requested abort is not an error; see
/// [FlashOutcome](crate::flasher::FlashOutcome).
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to query the device file system ({command} {path})")]
    #[diagnostic(
        code(mpyflash::probe_failed),
        help("Make sure the board is connected and running MicroPython")
    )]
    ProbeFailed {
        command: &'static str,
        path: String,
        #[source]
        source: Option<ToolError>,
    },

    #[error("Unknown chip type '{0}'")]
    #[diagnostic(
        code(mpyflash::unknown_chip),
        help("Supported chips are: {}", Chip::VARIANTS.join(", "))
    )]
    UnknownChipType(String),

    #[error("Failed to erase the flash of the {chip}")]
    #[diagnostic(
        code(mpyflash::erase_failed),
        help("Try holding the BOOT button while the flash is erased")
    )]
    FlasherEraseFailed {
        chip: Chip,
        #[source]
        source: ToolError,
    },

    #[error("Failed to write the firmware to the {chip}")]
    #[diagnostic(
        code(mpyflash::write_failed),
        help("Check that the firmware image matches the selected chip")
    )]
    FlasherWriteFailed {
        chip: Chip,
        #[source]
        source: ToolError,
    },

    #[error("Failed to upload '{}'", .file.display())]
    #[diagnostic(code(mpyflash::transfer_failed))]
    TransferFailed {
        file: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("Not enough space on {root}: {required} bytes needed, {available} bytes free")]
    #[diagnostic(
        code(mpyflash::space_exhausted),
        help("Remove files from the SD card, removable storage is never erased automatically")
    )]
    SpaceExhausted {
        root: StorageRoot,
        required: u64,
        available: u64,
    },

    #[error("Local file operation failed on '{}'", .path.display())]
    #[diagnostic(code(mpyflash::local_io))]
    LocalIoFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No {0} configured")]
    #[diagnostic(
        code(mpyflash::missing_config),
        help("Pass it on the command line or add it to mpyflash.toml")
    )]
    MissingConfig(&'static str),
}

/// Failure of a single external tool invocation
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ToolError {
    #[error("Failed to launch '{program}'")]
    #[diagnostic(
        code(mpyflash::tool_launch),
        help("Ensure the tool is installed, or set its path in the [tools] section")
    )]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exited {}", describe_exit(.code, .message))]
    #[diagnostic(code(mpyflash::tool_exit))]
    Exited {
        program: String,
        code: Option<i32>,
        message: Option<String>,
    },

    #[error("'{program}' did not finish within {}s", .timeout.as_secs())]
    #[diagnostic(code(mpyflash::tool_timeout))]
    TimedOut { program: String, timeout: Duration },

    #[error("IO error while talking to '{program}'")]
    #[diagnostic(code(mpyflash::tool_io))]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    /// Exit code of the tool, if it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Exited { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>, message: &Option<String>) -> String {
    let status = match code {
        Some(code) => format!("with code {code}"),
        None => String::from("after being terminated by a signal"),
    };

    match message {
        Some(message) => format!("{status}: {message}"),
        None => status,
    }
}
