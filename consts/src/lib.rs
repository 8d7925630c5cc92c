// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

/// Address of the Communication Region in AXI SRAM.
/// The region is placed in its own linker section right after the LCD framebuffer,
/// so the host can find it without reading the firmware symbol table.
pub const COMM_ADDRESS: u32 = 0x2402_5800;

/// Size of the header block at the start of the Communication Region.
/// Header fields only ever get appended inside this block.
pub const HEADER_BLOCK_SIZE: usize = 1024;

/// Size of one work context block (two slots plus the active copy).
pub const CONTEXT_BLOCK_SIZE: usize = 1024;

/// Number of work context slots the host can fill ("double buffering").
pub const NUM_SLOTS: usize = 2;

/// Size of each payload buffer and of the decompression scratch buffer.
pub const BUFFER_SIZE: usize = 256 << 10;

/// Window size used by the hash-only action. One 32-byte digest per window.
pub const HASH_CHUNK_SIZE: u32 = 256 << 10;

/// Length of a SHA-256 digest.
pub const SHA256_LEN: usize = 32;

/// Upper bound of the host-written progress value.
pub const PROGRESS_MAX: u32 = 26;

/// Memory-mapped window of the external OSPI NOR flash.
pub const EXTFLASH_BASE: u32 = 0x9000_0000;

/// External NOR flash page size; one page program per state machine tick.
pub const EXTFLASH_PAGE_SIZE: u32 = 256;

/// Base address of the internal flash (bank 1).
pub const INTFLASH_BASE: u32 = 0x0800_0000;

/// Base address of internal flash bank 2.
pub const INTFLASH_BANK2_BASE: u32 = 0x0810_0000;

/// Size of one internal flash bank (1 MiB).
pub const INTFLASH_BANK_SIZE: u32 = INTFLASH_BANK2_BASE - INTFLASH_BASE;

/// Internal flash sector size. Erase offsets and sizes are multiples of this.
pub const INTFLASH_SECTOR_SIZE: u32 = 8 << 10;

/// Internal flash word size (128 bits).
pub const INTFLASH_WORD_SIZE: u32 = 16;

/// Size erased on an internal bank when the host asks for `erase_bytes == 0`.
pub const INTFLASH_DEFAULT_ERASE: u32 = 256 << 10;
