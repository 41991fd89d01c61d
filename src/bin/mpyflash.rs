use std::{path::PathBuf, process::exit};

use clap::{Args, Parser, Subcommand};
use log::{debug, LevelFilter};
use miette::Result;
use mpyflash::{
    cli::{
        self, config::Config, ConnectArgs, FirmwareArgs, FlashArgs as BaseFlashArgs,
    },
    logging::initialize_logger,
    FlashOutcome,
};

#[derive(Debug, Parser)]
#[command(about, propagate_version = true, version)]
struct Cli {
    /// Use a specific configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Show debug output, including the output of the external tools
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a script, reflashing the firmware if the board needs it
    Flash(FlashArgs),
    /// List the files stored on the board
    Ls(LsArgs),
    /// Show the free space of the board's file system
    Free(FreeArgs),
    /// Erase the board and write the firmware image
    Reflash(ReflashArgs),
}

#[derive(Debug, Args)]
struct FlashArgs {
    #[command(flatten)]
    flash_args: BaseFlashArgs,
    #[command(flatten)]
    connect_args: ConnectArgs,
    #[command(flatten)]
    firmware_args: FirmwareArgs,
}

#[derive(Debug, Args)]
struct LsArgs {
    /// Directory to list, defaults to the storage root
    path: Option<String>,
    #[command(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct FreeArgs {
    /// File system to query
    #[arg(default_value = "/")]
    path: String,
    #[command(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct ReflashArgs {
    #[command(flatten)]
    connect_args: ConnectArgs,
    #[command(flatten)]
    firmware_args: FirmwareArgs,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    // Attempt to parse any provided comand-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse();
    initialize_logger(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    debug!("{:#?}", args);

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match args.subcommand {
        Commands::Flash(flash) => {
            let outcome = cli::flash(
                &flash.flash_args,
                &flash.connect_args,
                &flash.firmware_args,
                &config,
                args.verbose,
            )?;

            if outcome == FlashOutcome::Aborted {
                exit(130);
            }
            Ok(())
        }
        Commands::Ls(ls) => cli::list(ls.path.as_deref(), &ls.connect_args, &config),
        Commands::Free(free) => cli::free(&free.path, &free.connect_args, &config),
        Commands::Reflash(reflash) => cli::reflash(
            &reflash.connect_args,
            &reflash.firmware_args,
            &config,
            args.verbose,
        ),
    }
}
