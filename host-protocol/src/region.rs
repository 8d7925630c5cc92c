// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::mem::offset_of;
use core::ptr;
use core::sync::atomic::{fence, Ordering};

use consts::{BUFFER_SIZE, CONTEXT_BLOCK_SIZE, NUM_SLOTS, PROGRESS_MAX};

use crate::{layout, Error, Header, Status, WorkContext};

/// Offset of a header field inside the region.
macro_rules! header {
    ($field:ident) => {
        layout::HEADER + offset_of!(Header, $field)
    };
}

/// View of the Communication Region.
///
/// Header and context fields are accessed with volatile byte loads and stores, since
/// the other side writes them behind the compiler's back. Payload buffers are handed
/// out as plain slices: the `ready` handshake guarantees only one side uses a buffer
/// at a time.
pub struct Region<'a> {
    mem: &'a mut [u8],
}

impl<'a> Region<'a> {
    pub fn new(mem: &'a mut [u8]) -> Result<Self, Error> {
        if mem.len() < layout::REGION_SIZE {
            return Err(Error::RegionTooSmall {
                len: mem.len(),
                required: layout::REGION_SIZE,
            });
        }
        Ok(Self { mem })
    }

    /// Builds a region over the linker-placed communication block.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`layout::REGION_SIZE`] bytes of RAM that nothing
    /// else in the program aliases for `'a`.
    pub unsafe fn from_raw_parts(base: *mut u8) -> Self {
        Self {
            mem: core::slice::from_raw_parts_mut(base, layout::REGION_SIZE),
        }
    }

    /// Zeroes the whole region. Done once at boot.
    pub fn clear(&mut self) {
        let base = self.mem.as_mut_ptr();
        for i in 0..layout::REGION_SIZE {
            // SAFETY: `i` is in bounds, the length was checked at construction.
            unsafe { ptr::write_volatile(base.add(i), 0) };
        }
    }

    fn load(&self, offset: usize, out: &mut [u8]) {
        let src = &self.mem[offset..offset + out.len()];
        for (dst, byte) in out.iter_mut().zip(src) {
            // SAFETY: `byte` is a valid reference.
            *dst = unsafe { ptr::read_volatile(byte) };
        }
    }

    fn store(&mut self, offset: usize, data: &[u8]) {
        let dst = &mut self.mem[offset..offset + data.len()];
        for (byte, value) in dst.iter_mut().zip(data) {
            // SAFETY: `byte` is a valid reference.
            unsafe { ptr::write_volatile(byte, *value) };
        }
    }

    fn load_u32(&self, offset: usize) -> u32 {
        let mut raw = [0; 4];
        self.load(offset, &mut raw);
        u32::from_ne_bytes(raw)
    }

    fn store_u32(&mut self, offset: usize, value: u32) {
        self.store(offset, &value.to_ne_bytes());
    }

    // Header

    pub fn header(&self) -> Header {
        let mut raw = [0; Header::ENCODED_LEN];
        self.load(layout::HEADER, &mut raw);
        bytemuck::pod_read_unaligned(&raw)
    }

    pub fn status(&self) -> u32 {
        self.load_u32(header!(status))
    }

    pub fn set_status(&mut self, status: Status) {
        self.store_u32(header!(status), status.to_u32());
    }

    pub fn status_override(&self) -> u32 {
        self.load_u32(header!(status_override))
    }

    pub fn set_status_override(&mut self, value: u32) {
        self.store_u32(header!(status_override), value);
    }

    pub fn utc_timestamp(&self) -> u32 {
        self.load_u32(header!(utc_timestamp))
    }

    /// Host side: ask the device to set its RTC.
    pub fn set_utc_timestamp(&mut self, unix: u32) {
        self.store_u32(header!(utc_timestamp), unix);
    }

    /// Device side: consume a pending RTC request.
    pub fn take_utc_timestamp(&mut self) -> Option<u32> {
        match self.utc_timestamp() {
            0 => None,
            unix => {
                self.set_utc_timestamp(0);
                Some(unix)
            }
        }
    }

    pub fn progress(&self) -> u32 {
        self.load_u32(header!(progress))
    }

    /// Clamped to `[0, PROGRESS_MAX]`.
    pub fn set_progress(&mut self, progress: u32) {
        self.store_u32(
            header!(progress),
            progress.min(PROGRESS_MAX),
        );
    }

    pub fn flash_size(&self) -> u32 {
        self.load_u32(header!(flash_size))
    }

    pub fn min_erase_size(&self) -> u32 {
        self.load_u32(header!(min_erase_size))
    }

    /// Device side: publish the external flash geometry.
    pub fn set_flash_geometry(&mut self, size: u32, min_erase_size: u32) {
        self.store_u32(header!(flash_size), size);
        self.store_u32(header!(min_erase_size), min_erase_size);
    }

    pub fn set_upload_in_progress(&mut self, active: bool) {
        self.store_u32(
            header!(upload_in_progress),
            active as u32,
        );
    }

    pub fn set_download_in_progress(&mut self, active: bool) {
        self.store_u32(
            header!(download_in_progress),
            active as u32,
        );
    }

    // Context slots

    fn context_offset(slot: usize) -> Result<usize, Error> {
        if slot >= NUM_SLOTS {
            return Err(Error::InvalidSlot(slot));
        }
        Ok(layout::context(slot))
    }

    pub fn ready(&self, slot: usize) -> Result<u32, Error> {
        let base = Self::context_offset(slot)?;
        let ready = self.load_u32(base + WorkContext::READY);
        fence(Ordering::Acquire);
        Ok(ready)
    }

    pub fn response_ready(&self, slot: usize) -> Result<bool, Error> {
        let base = Self::context_offset(slot)?;
        let response_ready = self.load_u32(base + offset_of!(WorkContext, response_ready)) != 0;
        fence(Ordering::Acquire);
        Ok(response_ready)
    }

    /// Device side: the hash response in the slot buffer is complete.
    pub fn set_response_ready(&mut self, slot: usize) -> Result<(), Error> {
        let base = Self::context_offset(slot)?;
        fence(Ordering::Release);
        self.store_u32(base + offset_of!(WorkContext, response_ready), 1);
        Ok(())
    }

    pub fn context(&self, slot: usize) -> Result<WorkContext, Error> {
        let base = Self::context_offset(slot)?;
        let mut raw = [0; WorkContext::ENCODED_LEN];
        self.load(base, &mut raw);
        fence(Ordering::Acquire);
        Ok(bytemuck::pod_read_unaligned(&raw))
    }

    /// Host side: fill a free slot. Every field lands before `ready`.
    pub fn submit(&mut self, slot: usize, ctx: &WorkContext) -> Result<(), Error> {
        let base = Self::context_offset(slot)?;
        let raw = bytemuck::bytes_of(ctx);
        self.store(base, &raw[..WorkContext::READY]);
        fence(Ordering::Release);
        self.store_u32(base + WorkContext::READY, ctx.ready);
        Ok(())
    }

    /// Zeroes a slot, `ready` last, handing it back to the host.
    pub fn release(&mut self, slot: usize) -> Result<(), Error> {
        let base = Self::context_offset(slot)?;
        let zeros = [0; CONTEXT_BLOCK_SIZE];
        self.store(base, &zeros[..WorkContext::READY]);
        self.store(
            base + WorkContext::READY + 4,
            &zeros[WorkContext::READY + 4..],
        );
        fence(Ordering::Release);
        self.store_u32(base + WorkContext::READY, 0);
        Ok(())
    }

    /// Device side: copy the whole slot block into the active context and point its
    /// `buffer` field at the slot's payload buffer.
    ///
    /// The returned context is decoded from the active copy, never from the slot.
    pub fn claim(&mut self, slot: usize) -> Result<WorkContext, Error> {
        let base = Self::context_offset(slot)?;
        let mut block = [0; CONTEXT_BLOCK_SIZE];
        self.load(base, &mut block);
        fence(Ordering::Acquire);
        self.store(layout::ACTIVE_CONTEXT, &block);
        self.set_active_buffer(layout::address(layout::buffer(slot)));
        Ok(self.active_context())
    }

    pub fn active_context(&self) -> WorkContext {
        let mut raw = [0; WorkContext::ENCODED_LEN];
        self.load(layout::ACTIVE_CONTEXT, &mut raw);
        bytemuck::pod_read_unaligned(&raw)
    }

    pub fn set_active_buffer(&mut self, address: u32) {
        self.store_u32(layout::ACTIVE_CONTEXT + offset_of!(WorkContext, buffer), address);
    }

    // Buffers

    pub fn buffer(&self, slot: usize) -> Result<&[u8], Error> {
        Self::context_offset(slot)?;
        let start = layout::buffer(slot);
        Ok(&self.mem[start..start + BUFFER_SIZE])
    }

    pub fn buffer_mut(&mut self, slot: usize) -> Result<&mut [u8], Error> {
        Self::context_offset(slot)?;
        let start = layout::buffer(slot);
        Ok(&mut self.mem[start..start + BUFFER_SIZE])
    }

    pub fn decompress_buffer(&self) -> &[u8] {
        &self.mem[layout::DECOMPRESS_BUFFER..layout::REGION_SIZE]
    }

    /// Slot payload buffer and decompression buffer, borrowed together.
    pub fn payload_and_scratch(&mut self, slot: usize) -> Result<(&[u8], &mut [u8]), Error> {
        Self::context_offset(slot)?;
        let start = layout::buffer(slot);
        let (lower, upper) = self.mem.split_at_mut(layout::DECOMPRESS_BUFFER);
        Ok((
            &lower[start..start + BUFFER_SIZE],
            &mut upper[..BUFFER_SIZE],
        ))
    }
}
