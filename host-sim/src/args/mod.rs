// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use {clap::Parser, host_protocol::Bank, host_sim::SimConfig, std::path::PathBuf};

mod cli;
mod config;

pub use config::Error as ConfigError;

/// Program arguments loaded from the CLI and config file.
#[derive(Debug, Clone)]
pub struct Args {
    pub verbose: bool,
    pub board: SimConfig,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Flash {
        bank: Bank,
        offset: u32,
        input: PathBuf,
    },
    Erase {
        bank: Bank,
        offset: u32,
        size: u32,
        whole_chip: bool,
    },
    Hash {
        bank: Bank,
        offset: u32,
        size: u32,
    },
    Info,
}

impl Command {
    /// Whether the command may change the external flash contents.
    pub fn writes(&self) -> bool {
        matches!(self, Command::Flash { .. } | Command::Erase { .. })
    }
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    let config = cli
        .config
        .as_deref()
        .map(config::Config::load)
        .transpose()?
        .unwrap_or_default();

    // Reconcile the CLI and config arguments. Error if anything is specified both
    // on the CLI and in the config file.
    let defaults = SimConfig::default();
    let flash_size = match (cli.flash_size, config.flash_size) {
        (None, None) => defaults.flash_size,
        (None, Some(size)) | (Some(size), None) => size,
        (Some(_), Some(_)) => return Err(Error::FlashSizeInConfigAndCli),
    };
    let erase_size = match (cli.erase_size, config.erase_size) {
        (None, None) => defaults.erase_size,
        (None, Some(size)) | (Some(size), None) => size,
        (Some(_), Some(_)) => return Err(Error::EraseSizeInConfigAndCli),
    };
    let image = match (cli.image, config.image) {
        (None, None) => None,
        (None, Some(image)) | (Some(image), None) => Some(image),
        (Some(_), Some(_)) => return Err(Error::ImageInConfigAndCli),
    };

    let board = SimConfig {
        flash_size,
        erase_size,
        erase_busy_ticks: config.erase_busy_ticks.unwrap_or(defaults.erase_busy_ticks),
        chip_erase_busy_ticks: config
            .chip_erase_busy_ticks
            .unwrap_or(defaults.chip_erase_busy_ticks),
        image,
        tick_budget: config.tick_budget.unwrap_or(defaults.tick_budget),
        animate_every: config.animate_every.unwrap_or(defaults.animate_every),
        device: config.device.unwrap_or(defaults.device),
    };

    let command = match cli.command {
        cli::Command::Flash {
            bank,
            offset,
            input,
        } => Command::Flash {
            bank: bank.into(),
            offset,
            input,
        },
        cli::Command::Erase {
            bank,
            offset,
            size,
            whole_chip,
        } => {
            if size.is_none() && !whole_chip {
                return Err(Error::EraseSizeMissing);
            }
            Command::Erase {
                bank: bank.into(),
                offset,
                size: size.unwrap_or(0),
                whole_chip,
            }
        }
        cli::Command::Hash { bank, offset, size } => Command::Hash {
            bank: bank.into(),
            offset,
            size,
        },
        cli::Command::Info => Command::Info,
    };

    Ok(Args {
        verbose: cli.verbose,
        board,
        command,
    })
}

impl From<cli::Bank> for Bank {
    fn from(bank: cli::Bank) -> Self {
        match bank {
            cli::Bank::External => Bank::External,
            cli::Bank::Internal1 => Bank::Internal1,
            cli::Bank::Internal2 => Bank::Internal2,
        }
    }
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    Config(ConfigError),
    EraseSizeInConfigAndCli,
    EraseSizeMissing,
    FlashSizeInConfigAndCli,
    ImageInConfigAndCli,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::EraseSizeInConfigAndCli => {
                write!(f, "erase size specified both in config file and CLI")
            }
            Error::EraseSizeMissing => write!(f, "erase needs --size or --whole-chip"),
            Error::FlashSizeInConfigAndCli => {
                write!(f, "flash size specified both in config file and CLI")
            }
            Error::ImageInConfigAndCli => {
                write!(f, "image specified both in config file and CLI")
            }
        }
    }
}

impl std::error::Error for Error {}
