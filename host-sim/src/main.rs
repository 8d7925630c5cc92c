// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    colored::Colorize,
    host_protocol::{Bank, Status},
    host_sim::{Device, Host},
    std::{ffi::OsString, io::Write},
    tracing_subscriber::{fmt, prelude::*, EnvFilter},
};

mod args;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = args::args(args)?;
    init_tracing(args.verbose);

    let device = Device::new(&args.board)?;
    let mut host = Host::new(device, args.board.tick_budget);

    match &args.command {
        args::Command::Flash {
            bank,
            offset,
            input,
        } => {
            let data = std::fs::read(input).map_err(Error::ReadInputFile)?;
            let report = host.flash(*bank, *offset, &data)?;
            let human_size = humansize::format_size(report.bytes, humansize::BINARY);
            writeln!(
                &mut stdout,
                "{:10} {human_size} ({}) at {} {:#x}",
                "written".bold(),
                report.bytes,
                bank_name(*bank),
                offset,
            )
            .map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {} of {} sent",
                "chunks".bold(),
                report.sent,
                report.chunks,
            )
            .map_err(Error::Stdout)?;
        }
        args::Command::Erase {
            bank,
            offset,
            size,
            whole_chip,
        } => {
            host.erase(*bank, *offset, *size, *whole_chip)?;
            let what = if *whole_chip {
                "whole chip".to_string()
            } else {
                format!(
                    "{} at {} {offset:#x}",
                    humansize::format_size(*size, humansize::BINARY),
                    bank_name(*bank),
                )
            };
            writeln!(&mut stdout, "{:10} {what}", "erased".bold()).map_err(Error::Stdout)?;
        }
        args::Command::Hash { bank, offset, size } => {
            let hashes = host.read_hashes(*bank, *offset, *size)?;
            for (i, digest) in hashes.iter().enumerate() {
                let at = offset + i as u32 * consts::HASH_CHUNK_SIZE;
                writeln!(&mut stdout, "{:#010x} {}", at, hex::encode(digest))
                    .map_err(Error::Stdout)?;
            }
        }
        args::Command::Info => {
            host.wait_for_idle()?;
            let (flash_size, erase_size) = host.geometry()?;
            let status = host.status()?;
            writeln!(
                &mut stdout,
                "{:10} {} ({flash_size})",
                "flash".bold(),
                humansize::format_size(flash_size, humansize::BINARY),
            )
            .map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {} ({erase_size})",
                "erase".bold(),
                humansize::format_size(erase_size, humansize::BINARY),
            )
            .map_err(Error::Stdout)?;
            let name = Status::from_u32(status).map_or("UNKNOWN", Status::name);
            writeln!(&mut stdout, "{:10} {name} ({status:#010x})", "status".bold())
                .map_err(Error::Stdout)?;
        }
    }

    if args.command.writes() {
        if let Some(image) = &args.board.image {
            host.device().ext().save_image(image)?;
            tracing::info!("saved external flash to {}", image.display());
        }
    }
    let stats = host.device().ext().stats();
    tracing::debug!("external flash: {stats:?}");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Fails when a subscriber is already set, e.g. when run repeatedly in tests.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn bank_name(bank: Bank) -> &'static str {
    match bank {
        Bank::External => "external",
        Bank::Internal1 => "internal1",
        Bank::Internal2 => "internal2",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    ReadInputFile(std::io::Error),
    Sim(host_sim::Error),
    Stdout(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<host_sim::Error> for Error {
    fn from(e: host_sim::Error) -> Self {
        Error::Sim(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::Sim(e) => write!(f, "{e}"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
        }
    }
}

impl std::error::Error for Error {}
