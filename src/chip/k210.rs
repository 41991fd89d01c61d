use super::{FirmwareFlasher, FlashState};
use crate::{error::Error, progress::ProgressSink, tool::ToolRunner};

/// Write the firmware with the K210 board tool
///
/// The tool erases the sectors it writes, so there is no separate erase step.
pub(super) fn write(
    flasher: &mut FirmwareFlasher<'_>,
    runner: &mut dyn ToolRunner,
    progress: &mut dyn ProgressSink,
) -> Result<(), Error> {
    let config = flasher.config;
    let board = config.board.as_deref().ok_or(Error::MissingConfig("board"))?;

    let mut args = vec![
        format!("-p{}", config.port),
        format!("-b{}", config.baud),
        format!("-B{board}"),
    ];
    if config.slow_mode {
        args.push(String::from("-S"));
    }
    args.push(config.firmware.display().to_string());

    flasher.transition(FlashState::Writing);
    progress.status("Writing firmware...");
    runner
        .run(&config.tools.kflash, &args, &mut |line| {
            progress.tool_output(line)
        })
        .map_err(|source| Error::FlasherWriteFailed {
            chip: config.chip,
            source,
        })
}
