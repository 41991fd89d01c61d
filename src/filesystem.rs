//! Inspecting the file system of the device
//!
//! All queries go through the file transfer tool, which opens its own
//! connection to the board for every invocation.

use std::fmt;

use log::debug;
use serde::Deserialize;

use crate::{config::DeviceConfig, error::Error, tool::ToolRunner};

/// Where files are stored on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageRoot {
    /// The plain root of the file system
    Root,
    /// Internal flash mounted at `/flash`
    Flash,
    /// An SD card mounted at `/sd`
    Sd,
}

impl StorageRoot {
    pub fn as_path(&self) -> &'static str {
        match self {
            StorageRoot::Root => "/",
            StorageRoot::Flash => "/flash",
            StorageRoot::Sd => "/sd",
        }
    }

    /// Removable media is never erased to make room
    pub fn is_removable(&self) -> bool {
        matches!(self, StorageRoot::Sd)
    }
}

impl fmt::Display for StorageRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Pick the storage root from a listing of `/`
///
/// An SD card wins over internal flash when both are mounted. The caller has
/// to list the returned root again to learn what is stored there.
pub fn resolve_root<S: AsRef<str>>(listing: &[S]) -> StorageRoot {
    let has = |name: &str| listing.iter().any(|entry| entry.as_ref() == name);

    if has("sd") {
        StorageRoot::Sd
    } else if has("flash") {
        StorageRoot::Flash
    } else {
        StorageRoot::Root
    }
}

/// Files present on the device, below the resolved storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: StorageRoot,
    /// Base names, in listing order
    pub files: Vec<String>,
}

impl Snapshot {
    /// An empty file system, as left behind by a firmware reflash
    pub fn empty(root: StorageRoot) -> Self {
        Self {
            root,
            files: Vec::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|file| file == name)
    }
}

/// Free space information reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SpaceReport {
    /// Block size in bytes
    pub bsize: u64,
    /// Number of free blocks
    pub bfree: u64,
}

impl SpaceReport {
    pub fn free_bytes(&self) -> u64 {
        self.bsize.saturating_mul(self.bfree)
    }
}

/// Build the argument list for a file transfer tool sub-command
pub(crate) fn transfer_tool_args(config: &DeviceConfig, command: &str, arg: &str) -> Vec<String> {
    let mut args = vec![
        command.to_string(),
        format!("-p{}", config.port),
        // Give the board a moment after opening the port
        String::from("-d1"),
        format!("-r{}", if config.reset { 'T' } else { 'F' }),
    ];
    if config.chip.reduced_retries() {
        args.push(String::from("-a1"));
    }
    args.push(arg.to_string());

    args
}

/// Queries the device file system
pub struct Probe<'a> {
    config: &'a DeviceConfig,
}

impl<'a> Probe<'a> {
    pub fn new(config: &'a DeviceConfig) -> Self {
        Self { config }
    }

    /// List the base names of the files at `path`
    pub fn list_files(&self, runner: &mut dyn ToolRunner, path: &str) -> Result<Vec<String>, Error> {
        let mut files = Vec::new();

        runner
            .run(
                &self.config.tools.transfer,
                &transfer_tool_args(self.config, "ls", path),
                &mut |line| {
                    debug!("ls: {line}");
                    files.extend(line.split('\n').map(base_name));
                },
            )
            .map_err(|source| Error::ProbeFailed {
                command: "ls",
                path: path.to_string(),
                source: Some(source),
            })?;

        Ok(files)
    }

    /// Read block size and free block count of the file system at `path`
    pub fn free_space(&self, runner: &mut dyn ToolRunner, path: &str) -> Result<SpaceReport, Error> {
        let mut report = None;

        runner
            .run(
                &self.config.tools.transfer,
                &transfer_tool_args(self.config, "fsi", path),
                &mut |chunk| {
                    debug!("fsi: {chunk}");
                    if let Some(parsed) = parse_space_report(chunk) {
                        report = Some(parsed);
                    }
                },
            )
            .map_err(|source| Error::ProbeFailed {
                command: "fsi",
                path: path.to_string(),
                source: Some(source),
            })?;

        report.ok_or_else(|| Error::ProbeFailed {
            command: "fsi",
            path: path.to_string(),
            source: None,
        })
    }
}

fn base_name(line: &str) -> String {
    let line = line.trim_end_matches('\r');
    match line.rfind('/') {
        Some(index) => line[index + 1..].to_string(),
        None => line.to_string(),
    }
}

/// Parse a record like `{'bsize': 4096, 'bfree': 120}`
fn parse_space_report(chunk: &str) -> Option<SpaceReport> {
    let normalized = chunk.trim().replace('\'', "\"");
    serde_json::from_str(&normalized).ok()
}
