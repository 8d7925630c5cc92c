// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Collaborators the state machine drives. Their internals belong to the board
//! support code; only the contracts live here.

use consts::{INTFLASH_BANK_SIZE, SHA256_LEN};
use embedded_storage::nor_flash::NorFlash;
use host_protocol::Bank;
use sha2::{Digest, Sha256};

use crate::gui::View;
use crate::Fault;

/// Position of an incremental external erase.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EraseCursor {
    /// Next byte offset to erase.
    pub offset: u32,
    /// Bytes still to erase from `offset`.
    pub remaining: u32,
}

/// External OSPI NOR flash.
///
/// Memory-mapped reads and erase/program commands are mutually exclusive: the
/// caller switches modes explicitly around every operation.
pub trait ExternalFlash {
    fn enable_memory_mapped(&mut self);
    fn disable_memory_mapped(&mut self);

    /// Total size in bytes.
    fn size(&self) -> u32;

    /// Smallest erase granularity in bytes. A power of two.
    fn smallest_erase_size(&self) -> u32;

    /// Issues at most one non-blocking block erase at `cursor` and advances it.
    ///
    /// Does nothing while the chip is still busy. Returns `true` once
    /// `cursor.remaining` has reached zero; the last block may still be erasing.
    fn erase(&mut self, cursor: &mut EraseCursor) -> bool;

    /// Starts a non-blocking whole chip erase.
    fn chip_erase(&mut self);

    /// Programs `data` at `address`. `data` never crosses a page boundary.
    fn page_program(&mut self, address: u32, data: &[u8]);

    /// `true` when no erase or program is in flight.
    fn is_idle(&mut self) -> bool;

    /// Bytes `[offset, offset + len)` through the memory-mapped window.
    fn mapped(&self, offset: u32, len: u32) -> &[u8];
}

/// SHA-256 engine (the hardware HASH peripheral on the device).
pub trait Hasher {
    fn reset(&mut self);
    fn update(&mut self, data: &[u8]);
    fn finalize(&mut self) -> [u8; SHA256_LEN];

    fn digest(&mut self, data: &[u8]) -> [u8; SHA256_LEN] {
        self.reset();
        self.update(data);
        self.finalize()
    }
}

/// Software SHA-256.
#[derive(Default)]
pub struct Sha256Hasher(Sha256);

impl Hasher for Sha256Hasher {
    fn reset(&mut self) {
        Digest::reset(&mut self.0);
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize(&mut self) -> [u8; SHA256_LEN] {
        let mut digest = [0; SHA256_LEN];
        digest.copy_from_slice(&self.0.finalize_reset());
        digest
    }
}

pub trait Decompressor {
    /// Inflates `src` into `dst` and returns the number of bytes written.
    /// Zero signals failure, including output that would not fit `dst`.
    fn inflate(&mut self, dst: &mut [u8], src: &[u8]) -> usize;
}

/// Everything else on the board.
pub trait System {
    fn refresh_watchdog(&mut self);
    fn set_unix_time(&mut self, unix: u32);
    fn draw(&mut self, view: &View);
    fn power_pressed(&mut self) -> bool;
}

/// A span of one bank, as seen by the state machine.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub bank: Bank,
    /// Offset inside the bank.
    pub offset: u32,
    pub len: u32,
}

/// The collaborators, bundled.
///
/// The internal flash is one `NorFlash` device covering both banks, offset 0 being
/// the start of bank 1.
pub struct Board<X, I, H, D, S> {
    pub ext: X,
    pub int: I,
    pub hasher: H,
    pub decompressor: D,
    pub system: S,
}

impl<X, I, H, D, S> Board<X, I, H, D, S>
where
    X: ExternalFlash,
    I: NorFlash,
    H: Hasher,
    D: Decompressor,
    S: System,
{
    pub fn new(ext: X, int: I, hasher: H, decompressor: D, system: S) -> Self {
        Self {
            ext,
            int,
            hasher,
            decompressor,
            system,
        }
    }

    /// Size of a bank in bytes.
    pub fn bank_size(&self, bank: Bank) -> u32 {
        match bank {
            Bank::External => self.ext.size(),
            Bank::Internal1 | Bank::Internal2 => INTFLASH_BANK_SIZE,
        }
    }

    /// SHA-256 over RAM, refreshing the watchdog every `chunk` bytes.
    pub(crate) fn hash_ram(&mut self, data: &[u8], chunk: usize) -> [u8; SHA256_LEN] {
        self.hasher.reset();
        for piece in data.chunks(chunk) {
            self.system.refresh_watchdog();
            self.hasher.update(piece);
        }
        self.hasher.finalize()
    }

    /// SHA-256 over a flash span. Leaves the external flash memory-mapped.
    pub(crate) fn hash_span(&mut self, span: Span, chunk: usize) -> Result<[u8; SHA256_LEN], Fault> {
        self.ext.enable_memory_mapped();
        self.hasher.reset();
        match span.bank {
            Bank::External => {
                let data = self.ext.mapped(span.offset, span.len);
                for piece in data.chunks(chunk) {
                    self.system.refresh_watchdog();
                    self.hasher.update(piece);
                }
            }
            Bank::Internal1 | Bank::Internal2 => {
                let mut buf = [0u8; 256];
                let start = span.bank.internal_base() + span.offset;
                let end = start + span.len;
                let mut pos = start;
                let mut since_refresh = 0;
                while pos < end {
                    let n = (end - pos).min(buf.len() as u32);
                    self.int
                        .read(pos, &mut buf[..n as usize])
                        .map_err(|_| Fault::FlashFault)?;
                    self.hasher.update(&buf[..n as usize]);
                    pos += n;
                    since_refresh += n as usize;
                    if since_refresh >= chunk {
                        self.system.refresh_watchdog();
                        since_refresh = 0;
                    }
                }
            }
        }
        Ok(self.hasher.finalize())
    }

    /// `true` when the external span reads back as all `0xFF`.
    pub(crate) fn ext_is_erased(&mut self, offset: u32, len: u32, chunk: usize) -> bool {
        self.ext.enable_memory_mapped();
        let data = self.ext.mapped(offset, len);
        for piece in data.chunks(chunk) {
            self.system.refresh_watchdog();
            if piece.iter().any(|b| *b != 0xff) {
                return false;
            }
        }
        true
    }

    /// Synchronous sector erase of an internal span. Offset and length are
    /// sector aligned.
    pub(crate) fn erase_internal(&mut self, span: Span) -> Result<(), Fault> {
        self.ext.disable_memory_mapped();
        let from = span.bank.internal_base() + span.offset;
        self.system.refresh_watchdog();
        self.int
            .erase(from, from + span.len)
            .map_err(|_| Fault::FlashFault)
    }

    /// Programs `data` at an internal span offset in flash words, padding a
    /// trailing partial word with `0xFF`.
    pub(crate) fn program_internal(&mut self, bank: Bank, offset: u32, data: &[u8], chunk: usize) -> Result<(), Fault> {
        const MAX_WORD: usize = 64;

        self.ext.disable_memory_mapped();
        let word = I::WRITE_SIZE;
        if word == 0 || word > MAX_WORD || chunk % word != 0 {
            return Err(Fault::FlashFault);
        }

        let mut address = bank.internal_base() + offset;
        let whole = data.len() - data.len() % word;
        for piece in data[..whole].chunks(chunk) {
            self.system.refresh_watchdog();
            self.int.write(address, piece).map_err(|_| Fault::FlashFault)?;
            address += piece.len() as u32;
        }

        let tail = &data[whole..];
        if !tail.is_empty() {
            let mut padded = [0xffu8; MAX_WORD];
            padded[..tail.len()].copy_from_slice(tail);
            self.int
                .write(address, &padded[..word])
                .map_err(|_| Fault::FlashFault)?;
        }
        Ok(())
    }
}
