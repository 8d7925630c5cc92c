// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use host_protocol::{Bank, Status};

#[derive(Debug)]
pub enum Error {
    /// The device reported an error status.
    Device(u32),
    /// The device did not get there within the tick budget.
    Timeout(&'static str),
    Protocol(host_protocol::Error),
    Compress(std::io::Error),
    ReadImage(std::io::Error),
    WriteImage(std::io::Error),
    ImageTooLarge { len: usize, size: usize },
    Geometry { size: u32, erase_size: u32 },
    /// Offset above the memory-mapped base: an absolute address was given.
    AbsoluteOffset { bank: Bank, offset: u32 },
    NotAligned { bank: Bank, offset: u32, align: u32 },
    PayloadTooLarge(usize),
    /// Data does not fit the bank at the given offset.
    OutOfRange { offset: u32, len: usize, size: u32 },
    InvalidErase(&'static str),
}

impl From<host_protocol::Error> for Error {
    fn from(e: host_protocol::Error) -> Self {
        Error::Protocol(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Device(raw) => match Status::from_u32(*raw) {
                Ok(status) => write!(f, "device reported {status} ({raw:#010x})"),
                Err(_) => write!(f, "device reported unknown status {raw:#010x}"),
            },
            Error::Timeout(what) => write!(f, "timed out waiting for {what}"),
            Error::Protocol(e) => write!(f, "{e}"),
            Error::Compress(e) => write!(f, "failed to compress payload: {e}"),
            Error::ReadImage(e) => write!(f, "failed to read flash image: {e}"),
            Error::WriteImage(e) => write!(f, "failed to write flash image: {e}"),
            Error::ImageTooLarge { len, size } => {
                write!(f, "flash image of {len} bytes does not fit a {size} byte chip")
            }
            Error::Geometry { size, erase_size } => write!(
                f,
                "invalid flash geometry: {size} bytes with {erase_size} byte erase blocks"
            ),
            Error::AbsoluteOffset { bank, offset } => {
                let base = bank.base_address();
                write!(
                    f,
                    "offset {offset:#010x} is an address, did you mean {:#010x}?",
                    offset.wrapping_sub(base)
                )
            }
            Error::NotAligned { bank, offset, align } => {
                write!(f, "{bank:?} offset {offset:#x} must be a multiple of {align}")
            }
            Error::PayloadTooLarge(len) => {
                write!(f, "payload of {len} bytes exceeds the context buffer")
            }
            Error::OutOfRange { offset, len, size } => write!(
                f,
                "{len} bytes at {offset:#x} do not fit {size} bytes of flash"
            ),
            Error::InvalidErase(reason) => write!(f, "invalid erase: {reason}"),
        }
    }
}

impl std::error::Error for Error {}
