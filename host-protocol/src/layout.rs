// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Byte offsets of the blocks inside the Communication Region.
//!
//! ```text
//! 0x00000  header            1 KiB
//! 0x00400  contexts[0]       1 KiB
//! 0x00800  contexts[1]       1 KiB
//! 0x00c00  active_context    1 KiB
//! 0x01000  buffer[0]       256 KiB
//! 0x41000  buffer[1]       256 KiB
//! 0x81000  decompress      256 KiB
//! ```

use consts::{BUFFER_SIZE, COMM_ADDRESS, CONTEXT_BLOCK_SIZE, HEADER_BLOCK_SIZE, NUM_SLOTS};

pub const HEADER: usize = 0;
pub const CONTEXTS: usize = HEADER + HEADER_BLOCK_SIZE;
pub const ACTIVE_CONTEXT: usize = CONTEXTS + NUM_SLOTS * CONTEXT_BLOCK_SIZE;
pub const BUFFERS: usize = ACTIVE_CONTEXT + CONTEXT_BLOCK_SIZE;
pub const DECOMPRESS_BUFFER: usize = BUFFERS + NUM_SLOTS * BUFFER_SIZE;
pub const REGION_SIZE: usize = DECOMPRESS_BUFFER + BUFFER_SIZE;

/// Offset of context slot `slot`. The caller checks `slot < NUM_SLOTS`.
pub const fn context(slot: usize) -> usize {
    CONTEXTS + slot * CONTEXT_BLOCK_SIZE
}

/// Offset of the payload buffer paired with context slot `slot`.
pub const fn buffer(slot: usize) -> usize {
    BUFFERS + slot * BUFFER_SIZE
}

/// Device address of a region offset, as stored in the `buffer` context field.
pub const fn address(offset: usize) -> u32 {
    COMM_ADDRESS + offset as u32
}
