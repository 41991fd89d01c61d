//! Deciding what to upload, and whether it fits

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use crate::{filesystem::SpaceReport, progress::ProgressSink};

/// Bytes left free on the device after an upload
pub const RESERVE: u64 = 100;

/// A local file that may be uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Base name, which is also the name on the device
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl FileRecord {
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let size = path.metadata()?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            path: path.to_path_buf(),
            size,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub file: FileRecord,
    pub action: Action,
}

/// Candidate files split into those to upload and those already present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// In the order the candidates were discovered
    pub files: Vec<PlannedFile>,
    /// Combined size of the files to upload
    pub total_bytes: u64,
}

impl TransferPlan {
    pub fn to_write(&self) -> impl Iterator<Item = &FileRecord> {
        self.files
            .iter()
            .filter(|planned| planned.action == Action::Write)
            .map(|planned| &planned.file)
    }
}

/// Decide which candidates to upload
///
/// Files already on the device are skipped, except for the entry point which
/// is always uploaded.
pub fn plan_transfer<S: AsRef<str>>(
    candidates: &[FileRecord],
    existing: &[S],
    entry_point: &str,
) -> TransferPlan {
    let mut total_bytes = 0;
    let files = candidates
        .iter()
        .map(|file| {
            let present = existing.iter().any(|name| name.as_ref() == file.name);
            let action = if present && file.name != entry_point {
                Action::Skip
            } else {
                total_bytes += file.size;
                Action::Write
            };

            PlannedFile {
                file: file.clone(),
                action,
            }
        })
        .collect();

    TransferPlan { files, total_bytes }
}

/// How much of the free space an upload would use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub required: u64,
    pub capacity: u64,
    /// Rounded up
    pub percent: u64,
}

impl Utilization {
    pub fn new(required: u64, report: &SpaceReport) -> Self {
        let capacity = report.free_bytes();
        let percent = if capacity == 0 {
            if required == 0 {
                0
            } else {
                100
            }
        } else {
            (u128::from(required) * 100).div_ceil(u128::from(capacity)) as u64
        };

        Self {
            required,
            capacity,
            percent,
        }
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Uploading {} bytes ({}% of {} bytes free)",
            self.required, self.percent, self.capacity
        )
    }
}

/// Whether `total_bytes` fit into the free space while keeping `reserve`
/// bytes unused
pub fn fits(total_bytes: u64, report: &SpaceReport, reserve: u64) -> bool {
    i128::from(report.free_bytes()) - i128::from(total_bytes) >= i128::from(reserve)
}

/// Check the upload against [RESERVE], reporting the utilization
pub fn has_sufficient_space(
    total_bytes: u64,
    report: &SpaceReport,
    progress: &mut dyn ProgressSink,
) -> bool {
    progress.status(&Utilization::new(total_bytes, report).to_string());

    fits(total_bytes, report, RESERVE)
}
