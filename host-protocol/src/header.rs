// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::mem::size_of;

use bytemuck::{Pod, Zeroable};
use consts::HEADER_BLOCK_SIZE;

use crate::Error;

/// The header block at the start of the region. Fields are only appended.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Header {
    /// Output: current [`Status`](crate::Status).
    pub status: u32,
    /// Input: displayed instead of `status` when non-zero. Never read by the state machine.
    pub status_override: u32,
    /// Input: unix time to set the RTC to. Zero means no request.
    pub utc_timestamp: u32,
    /// Input: overall progress in `[0, 26]`, written by the host.
    pub progress: u32,
    /// Output: external flash size in bytes.
    pub flash_size: u32,
    /// Output: smallest external flash erase size in bytes.
    pub min_erase_size: u32,
    /// Input: non-zero while the host is uploading.
    pub upload_in_progress: u32,
    /// Input: non-zero while the host is downloading.
    pub download_in_progress: u32,
}

const _: () = assert!(Header::ENCODED_LEN <= HEADER_BLOCK_SIZE);

impl Header {
    pub const ENCODED_LEN: usize = size_of::<Self>();

    pub fn serialize(&self, buf: &mut [u8]) -> Result<(), Error> {
        let len = buf.len();
        let out = buf.get_mut(..Self::ENCODED_LEN).ok_or(Error::BufferTooSmall {
            len,
            required: Self::ENCODED_LEN,
        })?;
        out.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        let raw = buf.get(..Self::ENCODED_LEN).ok_or(Error::BufferTooSmall {
            len: buf.len(),
            required: Self::ENCODED_LEN,
        })?;
        Ok(bytemuck::pod_read_unaligned(raw))
    }

    /// The value the display shows: the override when set, else the status.
    pub fn displayed_status(&self) -> u32 {
        if self.status_override != 0 {
            self.status_override
        } else {
            self.status
        }
    }
}
