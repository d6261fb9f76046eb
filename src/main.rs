//! qflash - Quad SPI NOR flash simulator and programmer
//!
//! Runs the programming driver against the cycle-stepped device model. The
//! memory array can be backed by an image file, with OTP and sector locks
//! in a state file beside it, so a sequence of commands behaves like
//! repeated sessions on the same chip.
//!
//! # Architecture
//!
//! - `qflash-device` steps the flash one clock half-period at a time and
//!   exposes it through a simulated register bus controller
//! - `qflash-driver` erases, programs and verifies over any register bus
//! - this binary wires the two together from the command line and a
//!   TOML configuration file

mod cli;
mod commands;
mod config;
mod error;
mod image;

use clap::Parser;
use cli::{Cli, Commands, OtpCommands};
use config::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            log::info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    let image_path = cli.image.as_deref();
    let mut flash = image::open_flash(&config, image_path)?;

    let modified = match cli.command {
        Commands::Id => commands::run_id(&mut flash).map(|_| false),
        Commands::Read {
            output,
            start,
            length,
        } => commands::run_read(&mut flash, &output, start, length).map(|_| false),
        Commands::Write {
            input,
            start,
            no_verify,
            no_preserve,
        } => commands::run_write(&mut flash, &input, start, !no_verify, !no_preserve),
        Commands::Erase {
            start,
            length,
            subsector,
        } => {
            let range = start.zip(length);
            commands::run_erase(&mut flash, range, subsector).map(|_| true)
        }
        Commands::Verify { input, start } => {
            commands::run_verify(&mut flash, &input, start).map(|_| false)
        }
        Commands::Lock { sector, set } => {
            commands::run_lock(&mut flash, sector, set).map(|_| set.is_some())
        }
        Commands::Otp(subcmd) => match subcmd {
            OtpCommands::Read => commands::run_otp_read(&mut flash).map(|_| false),
            OtpCommands::Program { offset, data } => {
                commands::run_otp_program(&mut flash, offset, &data.0).map(|_| true)
            }
            OtpCommands::Lock => commands::run_otp_lock(&mut flash).map(|_| true),
        },
    }?;

    if let Some(path) = image_path {
        if modified {
            image::save_image(flash, path)?;
        }
    } else if modified {
        log::warn!("No --image given, changes are discarded on exit");
    }

    Ok(())
}
