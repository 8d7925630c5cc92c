// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Layout of the Communication Region shared by the flashing host and the device.
//!
//! The host writes into the region out of band (debug probe memory writes) and the
//! device polls it. There is no transport: everything here is fixed offsets inside a
//! block of RAM, so fields are only ever appended, never moved.

#![no_std]

pub mod context;
pub mod header;
pub mod layout;
mod region;
mod status;

pub use context::{Action, Bank, WorkContext};
pub use header::Header;
pub use region::Region;
pub use status::{is_error, Status};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The memory handed to [`Region`] is shorter than [`layout::REGION_SIZE`].
    RegionTooSmall { len: usize, required: usize },
    /// Slot index outside `0..NUM_SLOTS`.
    InvalidSlot(usize),
    /// A serialization buffer is shorter than the encoded block.
    BufferTooSmall { len: usize, required: usize },
    UnknownStatus(u32),
    UnknownAction(u32),
    UnknownBank(u32),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::RegionTooSmall { len, required } => {
                write!(f, "communication region too small: {len} < {required} bytes")
            }
            Error::InvalidSlot(slot) => write!(f, "invalid context slot {slot}"),
            Error::BufferTooSmall { len, required } => {
                write!(f, "buffer too small: {len} < {required} bytes")
            }
            Error::UnknownStatus(raw) => write!(f, "unknown status {raw:#010x}"),
            Error::UnknownAction(raw) => write!(f, "unknown action {raw}"),
            Error::UnknownBank(raw) => write!(f, "unknown bank {raw}"),
        }
    }
}
