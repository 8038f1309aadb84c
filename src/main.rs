//! dapflash - MCU flash programmer over SWD
//!
//! A thin front end over `dapflash-core`. A probe is opened by name, the
//! device family is given with `--family` or detected by trying each family
//! in turn, and the chosen family's flash target does the work.

mod cli;
mod commands;
mod probes;

use clap::Parser;
use cli::{Cli, Commands, FuseCommands};
use commands::FlashOptions;
use dapflash_core::image::ImageMode;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG still wins over -v
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Flash {
            target,
            image,
            no_erase,
            no_verify,
            verify_only,
        } => {
            let options = if verify_only {
                FlashOptions::verify_only()
            } else {
                FlashOptions {
                    mode: ImageMode::Program,
                    erase: !no_erase,
                    verify: !no_verify,
                }
            };
            commands::run_flash(&target, &image, options)
        }
        Commands::Verify { target, image } => {
            commands::run_flash(&target, &image, FlashOptions::verify_only())
        }
        Commands::Erase { target } => commands::run_erase(&target),
        Commands::Uicr {
            target,
            addr,
            value,
        } => commands::run_uicr(&target, addr, value),
        Commands::Fuses(FuseCommands::Show { target }) => commands::run_fuses_show(&target),
        Commands::Fuses(FuseCommands::Reset { target }) => commands::run_fuses_reset(&target),
        Commands::Info { target } => commands::run_info(&target),
        Commands::ListProbes => {
            commands::list_probes();
            Ok(())
        }
        Commands::ListDevices { family } => {
            commands::list_devices(family);
            Ok(())
        }
    }
}
