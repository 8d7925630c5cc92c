// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use consts::{
    CONTEXT_BLOCK_SIZE, EXTFLASH_BASE, INTFLASH_BANK2_BASE, INTFLASH_BANK_SIZE, INTFLASH_BASE,
    SHA256_LEN,
};

use crate::Error;

/// What the device should do with a claimed context.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Optionally erase, then program the payload and verify it.
    EraseAndFlash,
    /// Read back SHA-256 digests of 256 KiB windows into the slot buffer.
    Hash,
}

impl Action {
    pub const fn to_u32(self) -> u32 {
        match self {
            Action::EraseAndFlash => 0,
            Action::Hash => 1,
        }
    }

    pub fn from_u32(raw: u32) -> Result<Self, Error> {
        match raw {
            0 => Ok(Action::EraseAndFlash),
            1 => Ok(Action::Hash),
            _ => Err(Error::UnknownAction(raw)),
        }
    }
}

/// Destination region selector.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// External OSPI NOR flash.
    External,
    /// Internal flash bank 1.
    Internal1,
    /// Internal flash bank 2.
    Internal2,
}

impl Bank {
    pub const fn to_u32(self) -> u32 {
        match self {
            Bank::External => 0,
            Bank::Internal1 => 1,
            Bank::Internal2 => 2,
        }
    }

    pub fn from_u32(raw: u32) -> Result<Self, Error> {
        match raw {
            0 => Ok(Bank::External),
            1 => Ok(Bank::Internal1),
            2 => Ok(Bank::Internal2),
            _ => Err(Error::UnknownBank(raw)),
        }
    }

    pub const fn is_internal(self) -> bool {
        !matches!(self, Bank::External)
    }

    /// Absolute address of offset 0 of this bank in the device memory map.
    pub const fn base_address(self) -> u32 {
        match self {
            Bank::External => EXTFLASH_BASE,
            Bank::Internal1 => INTFLASH_BASE,
            Bank::Internal2 => INTFLASH_BANK2_BASE,
        }
    }

    /// Offset of this bank inside the internal flash seen as one device.
    ///
    /// Zero for the external flash, which is its own device.
    pub const fn internal_base(self) -> u32 {
        match self {
            Bank::External | Bank::Internal1 => 0,
            Bank::Internal2 => INTFLASH_BANK_SIZE,
        }
    }
}

/// One unit of work exchanged through a context slot.
///
/// The layout is the C struct the host writes through the probe: fields are only
/// ever appended, and `ready` stays last. The rest of the 1 KiB block is reserved.
///
/// `bank` and `action` are kept raw so that a host writing garbage still gets its
/// context claimed in order and rejected with a status, instead of silently stalling
/// the queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct WorkContext {
    /// Device address of the payload buffer. Informational only.
    pub buffer: u32,
    /// Payload length after decompression.
    pub size: u32,
    /// Destination offset inside `bank`.
    pub offset: u32,
    /// Non-zero to erase before programming.
    pub erase: u32,
    /// Bytes to erase from `offset`. Zero with `erase` means the whole chip
    /// (external) or 256 KiB (internal).
    pub erase_bytes: i32,
    /// Zero for a raw payload.
    pub compressed_size: u32,
    /// SHA-256 of the decompressed payload.
    pub expected_sha256: [u8; SHA256_LEN],
    pub bank: u32,
    pub action: u32,
    pub response_ready: u32,
    pub ready: u32,
}

const _: () = assert!(WorkContext::ENCODED_LEN <= CONTEXT_BLOCK_SIZE);

impl WorkContext {
    /// Bytes covered by the fields. The rest of the block is reserved.
    pub const ENCODED_LEN: usize = size_of::<Self>();

    /// Offset of `ready` inside the block.
    pub const READY: usize = offset_of!(WorkContext, ready);

    pub fn bank(&self) -> Result<Bank, Error> {
        Bank::from_u32(self.bank)
    }

    pub fn action(&self) -> Result<Action, Error> {
        Action::from_u32(self.action)
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed_size != 0
    }

    pub fn wants_erase(&self) -> bool {
        self.erase != 0
    }

    /// Copies every field, `ready` included, into the first
    /// [`WorkContext::ENCODED_LEN`] bytes of `buf`.
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
}
