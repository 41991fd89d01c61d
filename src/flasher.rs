//! The flash session
//!
//! A session writes the entry-point script, looks at what the device already
//! stores, and uploads what is missing. When the device cannot be queried, or
//! its internal storage is too small, the firmware is reflashed first and the
//! device is treated as empty afterwards.
//!
//! Sessions can be cancelled through a [CancelToken]. Cancellation is only
//! observed between steps: a tool that is already running is allowed to
//! finish, but no new tool is started, and whatever that tool reports
//! afterwards ends the session as aborted rather than failed.

use std::{
    fs, io,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};

use crate::{
    chip::FirmwareFlasher,
    config::DeviceConfig,
    error::Error,
    filesystem::{resolve_root, Probe, Snapshot, SpaceReport, StorageRoot},
    progress::{HostChannel, ProgressSink},
    space::{has_sufficient_space, plan_transfer, Action, FileRecord},
    tool::ToolRunner,
    transfer,
};

/// A cancellation flag shared between a session and whoever may abort it
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a session ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOutcome {
    /// Every file was uploaded or already present
    Completed,
    /// The session was cancelled before it could finish
    Aborted,
}

/// Result of a successful probe of the device
enum Probed {
    Ready(Snapshot, SpaceReport),
    Aborted,
}

/// Drives a single flash session
pub struct Flasher<'a> {
    config: &'a DeviceConfig,
    runner: &'a mut dyn ToolRunner,
    progress: &'a mut dyn ProgressSink,
    host: &'a mut dyn HostChannel,
    cancel: CancelToken,
}

impl<'a> Flasher<'a> {
    pub fn new(
        config: &'a DeviceConfig,
        runner: &'a mut dyn ToolRunner,
        progress: &'a mut dyn ProgressSink,
        host: &'a mut dyn HostChannel,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            runner,
            progress,
            host,
            cancel,
        }
    }

    /// Write `entry_source` as the entry-point script and upload it, along
    /// with the configured libraries
    pub fn flash(&mut self, entry_source: &str) -> Result<FlashOutcome, Error> {
        let candidates = self.prepare_project(entry_source)?;
        self.host.set_abort_enabled(true);

        if self.cancel.is_cancelled() {
            return Ok(self.aborted());
        }

        let existing = match self.probe() {
            Ok(Probed::Aborted) => return Ok(self.aborted()),
            Ok(Probed::Ready(snapshot, space)) => {
                let plan = plan_transfer(&candidates, &snapshot.files, &self.config.entry_point);

                if has_sufficient_space(plan.total_bytes, &space, self.progress) {
                    snapshot
                } else if self.cancel.is_cancelled() {
                    return Ok(self.aborted());
                } else if snapshot.root.is_removable() {
                    return Err(Error::SpaceExhausted {
                        root: snapshot.root,
                        required: plan.total_bytes,
                        available: space.free_bytes(),
                    });
                } else {
                    self.progress.warning(
                        "Not enough free space on the device, erasing it by reflashing the firmware",
                    );
                    if !self.reflash()? {
                        return Ok(self.aborted());
                    }
                    Snapshot::empty(snapshot.root)
                }
            }
            Err(err) => {
                if self.cancel.is_cancelled() {
                    return Ok(self.aborted());
                }

                // Any probe failure is treated as missing or broken firmware,
                // even when the tool failed for an unrelated reason.
                warn!("Probing the device failed: {err}");
                self.progress.warning(&format!(
                    "Could not read the device file system ({err}), reflashing the firmware"
                ));
                if !self.reflash()? {
                    return Ok(self.aborted());
                }
                Snapshot::empty(StorageRoot::Root)
            }
        };

        self.write_files(&candidates, &existing)
    }

    /// Write the entry point and collect the files to upload
    fn prepare_project(&self, entry_source: &str) -> Result<Vec<FileRecord>, Error> {
        let config = self.config;

        fs::create_dir_all(&config.project_dir).map_err(local_io(&config.project_dir))?;

        let entry_path = config.entry_point_path();
        fs::write(&entry_path, entry_source).map_err(local_io(&entry_path))?;

        let mut candidates =
            vec![FileRecord::from_path(&entry_path).map_err(local_io(&entry_path))?];
        for dir in &config.libraries {
            for file in library_files(dir).map_err(local_io(dir))? {
                if file.name == config.entry_point {
                    warn!(
                        "Not uploading {}, it would replace the entry point",
                        file.path.display()
                    );
                    continue;
                }
                candidates.push(file);
            }
        }
        debug!("{} candidate files", candidates.len());

        Ok(candidates)
    }

    /// List the root, resolve the storage root and read its free space
    fn probe(&mut self) -> Result<Probed, Error> {
        let probe = Probe::new(self.config);

        let listing = probe.list_files(self.runner, "/")?;
        let root = resolve_root(&listing);
        let files = match root {
            StorageRoot::Root => listing,
            _ => {
                info!("Using storage root {root}");
                probe.list_files(self.runner, root.as_path())?
            }
        };

        if self.cancel.is_cancelled() {
            return Ok(Probed::Aborted);
        }

        let space = probe.free_space(self.runner, root.as_path())?;
        debug!("{} free bytes at {root}", space.free_bytes());

        Ok(Probed::Ready(Snapshot { root, files }, space))
    }

    /// Reflash the firmware, returning `false` when the session was cancelled
    /// before it started
    fn reflash(&mut self) -> Result<bool, Error> {
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        self.host.set_abort_enabled(false);
        FirmwareFlasher::new(self.config).flash(self.runner, self.progress)?;
        self.progress.status("Firmware flashed");

        Ok(true)
    }

    /// Upload every candidate that is not already on the device
    fn write_files(
        &mut self,
        candidates: &[FileRecord],
        existing: &Snapshot,
    ) -> Result<FlashOutcome, Error> {
        let plan = plan_transfer(candidates, &existing.files, &self.config.entry_point);

        for planned in &plan.files {
            if self.cancel.is_cancelled() {
                return Ok(self.aborted());
            }

            match planned.action {
                Action::Skip => self
                    .progress
                    .status(&format!("{} already exists, skip", planned.file.name)),
                Action::Write => {
                    if let Err(err) =
                        transfer::put(self.config, self.runner, &planned.file, self.progress)
                    {
                        if self.cancel.is_cancelled() {
                            debug!("Upload interrupted: {err}");
                            return Ok(self.aborted());
                        }
                        return Err(err);
                    }
                }
            }
        }

        self.progress.success("Upload complete");
        Ok(FlashOutcome::Completed)
    }

    fn aborted(&mut self) -> FlashOutcome {
        self.progress.warning("Upload aborted");
        FlashOutcome::Aborted
    }
}

fn local_io(path: &Path) -> impl FnOnce(io::Error) -> Error {
    let path = path.to_path_buf();
    move |source| Error::LocalIoFailed { path, source }
}

/// Regular files directly inside `dir`, sorted by name
///
/// A library directory that does not exist is not an error.
fn library_files(dir: &Path) -> io::Result<Vec<FileRecord>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("Skipping missing library directory {}", dir.display());
            return Ok(Vec::new());
        }
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(FileRecord::from_path(entry.path())?);
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mpyflash-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();

        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn library_files_are_sorted_and_flat() {
        let dir = scratch_dir("libs");
        fs::write(dir.join("b.py"), "b = 1").unwrap();
        fs::write(dir.join("a.py"), "a = 22").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();

        let files = library_files(&dir).unwrap();

        let names: Vec<_> = files.iter().map(|f| (f.name.as_str(), f.size)).collect();
        assert_eq!(names, vec![("a.py", 6), ("b.py", 5)]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_library_dir_is_skipped() {
        let dir = scratch_dir("missing").join("does-not-exist");

        assert!(library_files(&dir).unwrap().is_empty());
    }
}
