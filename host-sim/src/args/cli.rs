// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    /// Path to config file.
    #[clap(long, short, global = true)]
    pub config: Option<PathBuf>,
    /// External flash size in bytes.
    #[clap(long, global = true, value_parser = parse_u32)]
    pub flash_size: Option<u32>,
    /// Smallest external flash erase size in bytes.
    #[clap(long, global = true, value_parser = parse_u32)]
    pub erase_size: Option<u32>,
    /// External flash image, loaded before and saved after the command.
    #[clap(long, global = true)]
    pub image: Option<PathBuf>,
    /// Log device activity at debug level.
    #[clap(long, short, global = true)]
    pub verbose: bool,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Write a file, skipping 256 KiB chunks that are already on the device.
    Flash {
        #[clap(long, short, value_enum, default_value_t = Bank::External)]
        bank: Bank,
        /// Offset inside the bank.
        #[clap(long, short, value_parser = parse_u32, default_value = "0")]
        offset: u32,
        /// File to write.
        input: PathBuf,
    },
    /// Erase a range, or the whole external chip.
    Erase {
        #[clap(long, short, value_enum, default_value_t = Bank::External)]
        bank: Bank,
        /// Offset inside the bank.
        #[clap(long, short, value_parser = parse_u32, default_value = "0")]
        offset: u32,
        /// Bytes to erase, rounded up to the erase size by the device.
        #[clap(long, short, value_parser = parse_u32)]
        size: Option<u32>,
        /// Erase the whole external chip.
        #[clap(long, conflicts_with = "size")]
        whole_chip: bool,
    },
    /// Print SHA-256 digests of 256 KiB windows.
    Hash {
        #[clap(long, short, value_enum, default_value_t = Bank::External)]
        bank: Bank,
        /// Offset inside the bank.
        #[clap(long, short, value_parser = parse_u32, default_value = "0")]
        offset: u32,
        /// Bytes to hash.
        #[clap(long, short, value_parser = parse_u32)]
        size: u32,
    },
    /// Print the flash geometry and device status.
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Bank {
    External,
    Internal1,
    Internal2,
}

/// Decimal or `0x`-prefixed hexadecimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}
