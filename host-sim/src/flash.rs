// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RAM-backed NOR flash chips.

use std::cell::Cell;
use std::path::Path;

use consts::{EXTFLASH_PAGE_SIZE, INTFLASH_BANK_SIZE, INTFLASH_SECTOR_SIZE, INTFLASH_WORD_SIZE};
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};
use manager::{EraseCursor, ExternalFlash};

use crate::Error;

/// Block erase sizes the external chip supports besides its smallest one.
const LARGE_BLOCKS: [u32; 2] = [64 << 10, 32 << 10];

/// Counters of what the external chip was asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtStats {
    pub block_erases: u32,
    pub chip_erases: u32,
    pub page_programs: u32,
    pub bytes_programmed: u64,
    /// Commands issued while memory-mapped, or mapped reads while in command mode.
    pub mode_violations: u32,
    /// Commands issued while an erase was still in flight.
    pub busy_violations: u32,
}

/// External OSPI NOR flash.
///
/// Erases take `erase_busy_ticks` polls to complete; programs are instant.
pub struct SimExtFlash {
    mem: Vec<u8>,
    erase_size: u32,
    erase_busy_ticks: u32,
    chip_erase_busy_ticks: u32,
    mapped: bool,
    busy: u32,
    stats: ExtStats,
    mapped_violations: Cell<u32>,
}

impl SimExtFlash {
    pub fn new(size: u32, erase_size: u32) -> Result<Self, Error> {
        if erase_size == 0 || !erase_size.is_power_of_two() || size % erase_size != 0 {
            return Err(Error::Geometry { size, erase_size });
        }
        Ok(Self {
            mem: vec![0xff; size as usize],
            erase_size,
            erase_busy_ticks: 0,
            chip_erase_busy_ticks: 0,
            mapped: true,
            busy: 0,
            stats: ExtStats::default(),
            mapped_violations: Cell::new(0),
        })
    }

    pub fn with_busy_ticks(mut self, erase: u32, chip_erase: u32) -> Self {
        self.erase_busy_ticks = erase;
        self.chip_erase_busy_ticks = chip_erase;
        self
    }

    /// Replaces the start of the chip with the contents of an image file.
    pub fn load_image(&mut self, path: &Path) -> Result<(), Error> {
        let image = std::fs::read(path).map_err(Error::ReadImage)?;
        if image.len() > self.mem.len() {
            return Err(Error::ImageTooLarge {
                len: image.len(),
                size: self.mem.len(),
            });
        }
        self.mem[..image.len()].copy_from_slice(&image);
        tracing::debug!("loaded {} bytes from {}", image.len(), path.display());
        Ok(())
    }

    pub fn save_image(&self, path: &Path) -> Result<(), Error> {
        std::fs::write(path, &self.mem).map_err(Error::WriteImage)
    }

    /// Raw chip contents, bypassing the mode checks.
    pub fn contents(&self) -> &[u8] {
        &self.mem
    }

    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    pub fn stats(&self) -> ExtStats {
        ExtStats {
            mode_violations: self.stats.mode_violations + self.mapped_violations.get(),
            ..self.stats
        }
    }

    fn command(&mut self) {
        if self.mapped {
            self.stats.mode_violations += 1;
        }
    }

    fn block_at(&self, offset: u32, remaining: u32) -> u32 {
        LARGE_BLOCKS
            .into_iter()
            .filter(|block| *block > self.erase_size)
            .find(|block| offset % block == 0 && remaining >= *block)
            .unwrap_or(self.erase_size)
    }
}

impl ExternalFlash for SimExtFlash {
    fn enable_memory_mapped(&mut self) {
        self.mapped = true;
    }

    fn disable_memory_mapped(&mut self) {
        self.mapped = false;
    }

    fn size(&self) -> u32 {
        self.mem.len() as u32
    }

    fn smallest_erase_size(&self) -> u32 {
        self.erase_size
    }

    fn erase(&mut self, cursor: &mut EraseCursor) -> bool {
        self.command();
        if self.busy > 0 {
            self.busy -= 1;
            return false;
        }
        if cursor.remaining > 0 {
            let block = self.block_at(cursor.offset, cursor.remaining);
            let start = cursor.offset as usize;
            let end = (start + block as usize).min(self.mem.len());
            self.mem[start.min(end)..end].fill(0xff);
            self.stats.block_erases += 1;
            self.busy = self.erase_busy_ticks;
            cursor.offset += block;
            cursor.remaining = cursor.remaining.saturating_sub(block);
        }
        cursor.remaining == 0
    }

    fn chip_erase(&mut self) {
        self.command();
        if self.busy > 0 {
            self.stats.busy_violations += 1;
        }
        self.mem.fill(0xff);
        self.stats.chip_erases += 1;
        self.busy = self.chip_erase_busy_ticks;
    }

    fn page_program(&mut self, address: u32, data: &[u8]) {
        self.command();
        if self.busy > 0 {
            self.stats.busy_violations += 1;
            self.busy = 0;
        }
        // A page program wraps around inside its page, like the real chip.
        let page = address - address % EXTFLASH_PAGE_SIZE;
        for (i, byte) in data.iter().enumerate() {
            let at = page + (address - page + i as u32) % EXTFLASH_PAGE_SIZE;
            if let Some(cell) = self.mem.get_mut(at as usize) {
                *cell &= byte;
            }
        }
        self.stats.page_programs += 1;
        self.stats.bytes_programmed += data.len() as u64;
    }

    fn is_idle(&mut self) -> bool {
        if self.busy > 0 {
            self.busy -= 1;
            return false;
        }
        true
    }

    fn mapped(&self, offset: u32, len: u32) -> &[u8] {
        if !self.mapped {
            self.mapped_violations.set(self.mapped_violations.get() + 1);
        }
        let start = (offset as usize).min(self.mem.len());
        let end = start.saturating_add(len as usize).min(self.mem.len());
        &self.mem[start..end]
    }
}

/// Both internal flash banks as one `NorFlash`, offset 0 being bank 1.
pub struct SimIntFlash {
    mem: Vec<u8>,
    erases: u32,
    fail: bool,
}

impl Default for SimIntFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl SimIntFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0xff; 2 * INTFLASH_BANK_SIZE as usize],
            erases: 0,
            fail: false,
        }
    }

    pub fn contents(&self) -> &[u8] {
        &self.mem
    }

    /// Sectors erased so far.
    pub fn erases(&self) -> u32 {
        self.erases
    }

    /// Makes every following erase and write report an error.
    pub fn set_failing(&mut self, fail: bool) {
        self.fail = fail;
    }

    fn check(&self, offset: u32, len: usize, align: u32) -> Result<(), NorFlashErrorKind> {
        if self.fail {
            return Err(NorFlashErrorKind::Other);
        }
        if offset % align != 0 || len as u32 % align != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if offset as usize + len > self.mem.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(())
    }
}

impl ErrorType for SimIntFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for SimIntFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let src = self
            .mem
            .get(start..start + bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.mem.len()
    }
}

impl NorFlash for SimIntFlash {
    const WRITE_SIZE: usize = INTFLASH_WORD_SIZE as usize;
    const ERASE_SIZE: usize = INTFLASH_SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let len = to.checked_sub(from).ok_or(NorFlashErrorKind::OutOfBounds)?;
        self.check(from, len as usize, INTFLASH_SECTOR_SIZE)?;
        self.mem[from as usize..to as usize].fill(0xff);
        self.erases += len / INTFLASH_SECTOR_SIZE;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check(offset, bytes.len(), INTFLASH_WORD_SIZE)?;
        let start = offset as usize;
        for (cell, byte) in self.mem[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_prefers_large_blocks() {
        let mut flash = SimExtFlash::new(1 << 20, 4096).unwrap();
        flash.disable_memory_mapped();
        let mut cursor = EraseCursor {
            offset: 0x1_0000 - 0x2000,
            remaining: 0x2000 + 0x1_0000 + 0x1000,
        };
        while !flash.erase(&mut cursor) {}
        // Two 4K blocks up to the 64K boundary, one 64K block, one 4K block.
        assert_eq!(flash.stats().block_erases, 4);
        assert_eq!(cursor.offset, 0x2_1000);
        assert_eq!(flash.stats().mode_violations, 0);
    }

    #[test]
    fn erase_waits_for_busy_chip() {
        let mut flash = SimExtFlash::new(1 << 20, 4096).unwrap().with_busy_ticks(2, 0);
        flash.disable_memory_mapped();
        let mut cursor = EraseCursor {
            offset: 0,
            remaining: 8192,
        };
        assert!(!flash.erase(&mut cursor));
        assert!(!flash.erase(&mut cursor));
        assert!(!flash.erase(&mut cursor));
        assert!(flash.erase(&mut cursor));
        assert!(!flash.is_idle());
        assert!(!flash.is_idle());
        assert!(flash.is_idle());
    }

    #[test]
    fn program_only_clears_bits_and_wraps_in_page() {
        let mut flash = SimExtFlash::new(1 << 16, 4096).unwrap();
        flash.disable_memory_mapped();
        flash.page_program(0, &[0x0f]);
        flash.page_program(0, &[0xf1]);
        flash.page_program(254, &[1, 2, 3]);
        assert_eq!(flash.contents()[0], 0x01);
        assert_eq!(&flash.contents()[254..256], &[1, 2]);
        assert_eq!(flash.contents()[256], 0xff);
    }

    #[test]
    fn mode_violations_are_counted() {
        let mut flash = SimExtFlash::new(1 << 16, 4096).unwrap();
        flash.page_program(0, &[0]);
        flash.disable_memory_mapped();
        let _ = flash.mapped(0, 16);
        assert_eq!(flash.stats().mode_violations, 2);
    }

    #[test]
    fn bad_geometry() {
        assert!(SimExtFlash::new(1 << 20, 3000).is_err());
        assert!(SimExtFlash::new(1000, 4096).is_err());
    }

    #[test]
    fn internal_alignment() {
        let mut flash = SimIntFlash::new();
        assert_eq!(flash.erase(4096, 8192), Err(NorFlashErrorKind::NotAligned));
        assert_eq!(flash.write(8, &[0; 16]), Err(NorFlashErrorKind::NotAligned));
        assert_eq!(
            flash.write(2 * INTFLASH_BANK_SIZE, &[0; 16]),
            Err(NorFlashErrorKind::OutOfBounds)
        );
        flash.write(16, &[0xaa; 16]).unwrap();
        assert_eq!(&flash.contents()[16..32], &[0xaa; 16]);
        flash.erase(0, 8192).unwrap();
        assert_eq!(flash.erases(), 1);
        assert_eq!(&flash.contents()[16..32], &[0xff; 16]);
    }

    #[test]
    fn failing_internal_flash() {
        let mut flash = SimIntFlash::new();
        flash.set_failing(true);
        assert_eq!(flash.write(0, &[0; 16]), Err(NorFlashErrorKind::Other));
    }
}
