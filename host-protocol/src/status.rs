// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::Error;

const ERROR_TAG: u32 = 0xbad0_0000;
const INFO_TAG: u32 = 0xcafe_0000;
const TAG_MASK: u32 = 0xffff_0000;

/// Machine-wide status register value.
///
/// Two namespaces share the register, told apart by the high half:
/// `0xbad0xxxx` for faults and `0xcafexxxx` for informational states.
/// Values are part of the host protocol and only get appended.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Region freshly zeroed, the state machine has not run yet.
    Booting,
    /// Uploaded payload does not match its expected SHA-256.
    BadHashRam,
    /// Programmed flash does not match the expected SHA-256.
    BadHashFlash,
    /// Erase start address is not a multiple of the smallest erase size.
    NotAligned,
    /// Decompression failed or produced the wrong length.
    BadDecompress,
    /// Unknown action, invalid bank, or sizes that do not fit the buffers or the flash.
    BadParameter,
    /// The internal flash driver reported an error.
    FlashFault,
    Idle,
    Erase,
    Prog,
    Hash,
}

impl Status {
    pub const fn to_u32(self) -> u32 {
        match self {
            Status::Booting => 0,
            Status::BadHashRam => ERROR_TAG | 1,
            Status::BadHashFlash => ERROR_TAG | 2,
            Status::NotAligned => ERROR_TAG | 3,
            Status::BadDecompress => ERROR_TAG | 4,
            Status::BadParameter => ERROR_TAG | 5,
            Status::FlashFault => ERROR_TAG | 6,
            Status::Idle => INFO_TAG,
            Status::Erase => INFO_TAG | 1,
            Status::Prog => INFO_TAG | 2,
            Status::Hash => INFO_TAG | 3,
        }
    }

    pub fn from_u32(raw: u32) -> Result<Self, Error> {
        let status = match raw {
            0 => Status::Booting,
            0xbad0_0001 => Status::BadHashRam,
            0xbad0_0002 => Status::BadHashFlash,
            0xbad0_0003 => Status::NotAligned,
            0xbad0_0004 => Status::BadDecompress,
            0xbad0_0005 => Status::BadParameter,
            0xbad0_0006 => Status::FlashFault,
            0xcafe_0000 => Status::Idle,
            0xcafe_0001 => Status::Erase,
            0xcafe_0002 => Status::Prog,
            0xcafe_0003 => Status::Hash,
            _ => return Err(Error::UnknownStatus(raw)),
        };
        Ok(status)
    }

    pub const fn is_error(self) -> bool {
        is_error(self.to_u32())
    }

    /// Short label used by the host tools and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Status::Booting => "BOOTING",
            Status::BadHashRam => "BAD_HASH_RAM",
            Status::BadHashFlash => "BAD_HASH_FLASH",
            Status::NotAligned => "NOT_ALIGNED",
            Status::BadDecompress => "BAD_DECOMPRESS",
            Status::BadParameter => "BAD_PARAMETER",
            Status::FlashFault => "FLASH_FAULT",
            Status::Idle => "IDLE",
            Status::Erase => "ERASE",
            Status::Prog => "PROG",
            Status::Hash => "HASH",
        }
    }
}

impl From<Status> for u32 {
    fn from(status: Status) -> u32 {
        status.to_u32()
    }
}

impl TryFrom<u32> for Status {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self, Error> {
        Status::from_u32(raw)
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error detection on a raw register value, including codes this build does not know.
pub const fn is_error(raw: u32) -> bool {
    raw & TAG_MASK == ERROR_TAG
}
