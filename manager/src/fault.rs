// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use host_protocol::Status;

/// Fatal per-context conditions. Each one parks the state machine in
/// `State::Error` until the board is reset.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Payload in RAM does not hash to `expected_sha256`; the upload is corrupt.
    BadHashRam,
    /// Flash does not hash to `expected_sha256` after programming.
    BadHashFlash,
    /// Erase start is not a multiple of the smallest erase size.
    NotAligned,
    BadDecompress,
    BadParameter,
    FlashFault,
}

impl Fault {
    pub const fn status(self) -> Status {
        match self {
            Fault::BadHashRam => Status::BadHashRam,
            Fault::BadHashFlash => Status::BadHashFlash,
            Fault::NotAligned => Status::NotAligned,
            Fault::BadDecompress => Status::BadDecompress,
            Fault::BadParameter => Status::BadParameter,
            Fault::FlashFault => Status::FlashFault,
        }
    }
}

impl From<host_protocol::Error> for Fault {
    fn from(_: host_protocol::Error) -> Self {
        Fault::BadParameter
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.status().name())
    }
}
