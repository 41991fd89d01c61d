//! Firmware flashing, per chip family
//!
//! ESP chips are reflashed in two steps with the erase/write tool: the whole
//! flash is erased, then the image is written. K210 boards are written in a
//! single pass with their own board tool, which erases as it goes.

use log::{debug, info};
use strum::{Display, EnumString, VariantNames};

pub use esp32::Esp32;
pub use esp8266::Esp8266;

use crate::{config::DeviceConfig, error::Error, progress::ProgressSink, tool::ToolRunner};

mod esp32;
mod esp8266;
mod k210;

/// All supported chip families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, VariantNames)]
#[non_exhaustive]
#[strum(serialize_all = "lowercase")]
pub enum Chip {
    /// ESP32
    Esp32,
    /// ESP8266
    Esp8266,
    /// Kendryte K210
    K210,
}

impl Chip {
    /// Look up a chip by its configured name
    pub fn from_name(name: &str) -> Result<Self, Error> {
        name.trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| Error::UnknownChipType(name.to_string()))
    }

    /// Whether the transfer tool should limit its connection retries
    ///
    /// Every retry toggles the reset lines, which K210 boards do not cope
    /// with well.
    pub fn reduced_retries(&self) -> bool {
        matches!(self, Chip::K210)
    }
}

/// An ESP chip reflashed through the erase/write tool
pub trait EsptoolChip {
    /// Value of the tool's `--chip` argument
    const CHIP_ID: &'static str;

    /// Arguments placed between `write_flash` and the image path
    const WRITE_ARGS: &'static [&'static str];
}

/// Progress of a firmware reflash
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlashState {
    #[default]
    Idle,
    Erasing,
    Writing,
    Done,
    Failed,
}

/// Reflashes the firmware of the configured chip
pub struct FirmwareFlasher<'a> {
    config: &'a DeviceConfig,
    state: FlashState,
}

impl<'a> FirmwareFlasher<'a> {
    pub fn new(config: &'a DeviceConfig) -> Self {
        Self {
            config,
            state: FlashState::Idle,
        }
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Erase (where the chip needs it) and write the firmware image
    ///
    /// The first failing step ends the reflash; nothing is retried.
    pub fn flash(
        &mut self,
        runner: &mut dyn ToolRunner,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), Error> {
        info!(
            "Flashing {} firmware {}",
            self.config.chip,
            self.config.firmware.display()
        );

        let result = match self.config.chip {
            Chip::Esp32 => self.erase_and_write::<Esp32>(runner, progress),
            Chip::Esp8266 => self.erase_and_write::<Esp8266>(runner, progress),
            Chip::K210 => k210::write(self, runner, progress),
        };

        match result {
            Ok(()) => self.transition(FlashState::Done),
            Err(_) => self.transition(FlashState::Failed),
        }

        result
    }

    fn transition(&mut self, next: FlashState) {
        debug!("Firmware flasher: {} -> {}", self.state, next);
        self.state = next;
    }

    fn erase_and_write<C: EsptoolChip>(
        &mut self,
        runner: &mut dyn ToolRunner,
        progress: &mut dyn ProgressSink,
    ) -> Result<(), Error> {
        let config = self.config;
        let chip = config.chip;
        let esptool = &config.tools.esptool;

        self.transition(FlashState::Erasing);
        progress.status("Erasing flash...");
        runner
            .run(esptool, &erase_args::<C>(config), &mut |line| {
                progress.tool_output(line)
            })
            .map_err(|source| Error::FlasherEraseFailed { chip, source })?;

        self.transition(FlashState::Writing);
        progress.status("Writing firmware...");
        runner
            .run(esptool, &write_args::<C>(config), &mut |line| {
                progress.tool_output(line)
            })
            .map_err(|source| Error::FlasherWriteFailed { chip, source })?;

        Ok(())
    }
}

fn erase_args<C: EsptoolChip>(config: &DeviceConfig) -> Vec<String> {
    vec![
        String::from("--chip"),
        C::CHIP_ID.to_string(),
        String::from("--port"),
        config.port.clone(),
        String::from("erase_flash"),
    ]
}

fn write_args<C: EsptoolChip>(config: &DeviceConfig) -> Vec<String> {
    let mut args = vec![
        String::from("--chip"),
        C::CHIP_ID.to_string(),
        String::from("--port"),
        config.port.clone(),
        String::from("--baud"),
        config.baud.to_string(),
        String::from("write_flash"),
    ];
    args.extend(C::WRITE_ARGS.iter().map(|arg| arg.to_string()));
    args.push(config.firmware.display().to_string());

    args
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::ToolError, progress::LogProgress};

    /// Records invocations and fails the `n`th one
    #[derive(Default)]
    struct Recorder {
        calls: Vec<(PathBuf, Vec<String>)>,
        fail_at: Option<usize>,
    }

    impl ToolRunner for Recorder {
        fn run(
            &mut self,
            program: &Path,
            args: &[String],
            sink: &mut dyn FnMut(&str),
        ) -> Result<(), ToolError> {
            self.calls.push((program.to_path_buf(), args.to_vec()));
            sink("ok");
            if self.fail_at == Some(self.calls.len() - 1) {
                return Err(ToolError::Exited {
                    program: program.display().to_string(),
                    code: Some(2),
                    message: None,
                });
            }
            Ok(())
        }
    }

    fn config(chip: Chip) -> DeviceConfig {
        let mut config = DeviceConfig::new(chip, "/dev/ttyUSB0", "fw.bin", "/tmp/project");
        config.baud = 460_800;
        config.board = Some(String::from("dan"));
        config
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn chip_names_parse_case_insensitively() {
        assert_eq!(Chip::from_name("esp32").unwrap(), Chip::Esp32);
        assert_eq!(Chip::from_name("ESP8266").unwrap(), Chip::Esp8266);
        assert_eq!(Chip::from_name(" k210 ").unwrap(), Chip::K210);
    }

    #[test]
    fn unknown_chip_is_rejected() {
        let err = Chip::from_name("rp2040").unwrap_err();

        assert!(matches!(err, Error::UnknownChipType(name) if name == "rp2040"));
    }

    #[test]
    fn esp32_erases_then_writes() {
        let config = config(Chip::Esp32);
        let mut runner = Recorder::default();
        let mut flasher = FirmwareFlasher::new(&config);

        flasher.flash(&mut runner, &mut LogProgress).unwrap();

        assert_eq!(flasher.state(), FlashState::Done);
        assert_eq!(
            runner.calls,
            vec![
                (
                    PathBuf::from("esptool.py"),
                    args(&["--chip", "esp32", "--port", "/dev/ttyUSB0", "erase_flash"])
                ),
                (
                    PathBuf::from("esptool.py"),
                    args(&[
                        "--chip",
                        "esp32",
                        "--port",
                        "/dev/ttyUSB0",
                        "--baud",
                        "460800",
                        "write_flash",
                        "-z",
                        "0x1000",
                        "fw.bin"
                    ])
                ),
            ]
        );
    }

    #[test]
    fn esp8266_writes_with_detected_flash_size() {
        let config = config(Chip::Esp8266);
        let mut runner = Recorder::default();

        FirmwareFlasher::new(&config)
            .flash(&mut runner, &mut LogProgress)
            .unwrap();

        assert_eq!(runner.calls.len(), 2);
        assert_eq!(
            runner.calls[1].1,
            args(&[
                "--chip",
                "esp8266",
                "--port",
                "/dev/ttyUSB0",
                "--baud",
                "460800",
                "write_flash",
                "--flash_size=detect",
                "0",
                "fw.bin"
            ])
        );
    }

    #[test]
    fn failed_erase_skips_write() {
        let config = config(Chip::Esp32);
        let mut runner = Recorder {
            fail_at: Some(0),
            ..Default::default()
        };
        let mut flasher = FirmwareFlasher::new(&config);

        let err = flasher.flash(&mut runner, &mut LogProgress).unwrap_err();

        assert!(matches!(err, Error::FlasherEraseFailed { chip: Chip::Esp32, .. }));
        assert_eq!(flasher.state(), FlashState::Failed);
        assert_eq!(runner.calls.len(), 1);
    }

    #[test]
    fn failed_write_is_reported() {
        let config = config(Chip::Esp8266);
        let mut runner = Recorder {
            fail_at: Some(1),
            ..Default::default()
        };
        let mut flasher = FirmwareFlasher::new(&config);

        let err = flasher.flash(&mut runner, &mut LogProgress).unwrap_err();

        assert!(matches!(err, Error::FlasherWriteFailed { .. }));
        assert_eq!(flasher.state(), FlashState::Failed);
    }

    #[test]
    fn k210_writes_in_one_pass() {
        let mut config = config(Chip::K210);
        config.slow_mode = true;
        let mut runner = Recorder::default();
        let mut flasher = FirmwareFlasher::new(&config);

        flasher.flash(&mut runner, &mut LogProgress).unwrap();

        assert_eq!(flasher.state(), FlashState::Done);
        assert_eq!(
            runner.calls,
            vec![(
                PathBuf::from("kflash"),
                args(&["-p/dev/ttyUSB0", "-b460800", "-Bdan", "-S", "fw.bin"])
            )]
        );
    }

    #[test]
    fn k210_without_board_spawns_nothing() {
        let mut config = config(Chip::K210);
        config.board = None;
        let mut runner = Recorder::default();

        let err = FirmwareFlasher::new(&config)
            .flash(&mut runner, &mut LogProgress)
            .unwrap_err();

        assert!(matches!(err, Error::MissingConfig("board")));
        assert!(runner.calls.is_empty());
    }
}
