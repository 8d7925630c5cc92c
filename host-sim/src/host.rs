// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The flashing host: fills context slots through the debug probe and polls the
//! header for the outcome. Here the "probe" is direct access to the simulated
//! device RAM, and every poll lets the device run one tick.

use consts::{
    BUFFER_SIZE, EXTFLASH_BASE, HASH_CHUNK_SIZE, INTFLASH_BANK_SIZE, INTFLASH_BASE,
    INTFLASH_SECTOR_SIZE, NUM_SLOTS, PROGRESS_MAX, SHA256_LEN,
};
use host_protocol::{is_error, Action, Bank, Region, Status, WorkContext};

use crate::{lzma, sha256, Device, Error};

/// External offsets the host accepts are multiples of this.
const EXTFLASH_ALIGN: u32 = 4 << 10;

/// How [`Host::program`] submits a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Program {
    /// Erase the destination first.
    pub erase: bool,
    /// Send LZMA-compressed when that saves at least 10%.
    pub compress: bool,
    /// Wait until the device has written and verified everything.
    pub blocking: bool,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            erase: true,
            compress: true,
            blocking: true,
        }
    }
}

/// What [`Host::flash`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// 256 KiB chunks in the padded image.
    pub chunks: usize,
    /// Chunks that differed from the device and were sent.
    pub sent: usize,
    /// Padded image length.
    pub bytes: usize,
}

pub struct Host {
    device: Device,
    counter: u32,
    tick_budget: u64,
}

impl Host {
    pub fn new(device: Device, tick_budget: u64) -> Self {
        Self {
            device,
            counter: 1,
            tick_budget,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn into_device(self) -> Device {
        self.device
    }

    /// Starts counting contexts from 1 again, as after a device reset.
    pub fn reset_counter(&mut self) {
        self.counter = 1;
    }

    pub fn status(&mut self) -> Result<u32, Error> {
        Ok(self.device.region()?.status())
    }

    /// External flash size and smallest erase size published by the device.
    pub fn geometry(&mut self) -> Result<(u32, u32), Error> {
        let region = self.device.region()?;
        Ok((region.flash_size(), region.min_erase_size()))
    }

    pub fn set_time(&mut self, unix: u32) -> Result<(), Error> {
        self.device.region()?.set_utc_timestamp(unix);
        Ok(())
    }

    pub fn set_status_override(&mut self, value: u32) -> Result<(), Error> {
        self.device.region()?.set_status_override(value);
        Ok(())
    }

    fn next_token(&mut self) -> u32 {
        let token = self.counter;
        self.counter = match self.counter.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        token
    }

    /// Ticks the device until `done` holds.
    fn wait_for<F>(&mut self, what: &'static str, mut done: F) -> Result<(), Error>
    where
        F: FnMut(&Region<'_>) -> Result<bool, Error>,
    {
        for _ in 0..=self.tick_budget {
            if done(&self.device.region()?)? {
                return Ok(());
            }
            self.device.tick()?;
        }
        Err(Error::Timeout(what))
    }

    /// First slot the device is done with, ticking the device until there is one.
    pub fn get_context(&mut self) -> Result<usize, Error> {
        let mut free = None;
        self.wait_for("a free context", |region| {
            check_status(region)?;
            free = free_slot(region)?;
            Ok(free.is_some())
        })?;
        free.ok_or(Error::Timeout("a free context"))
    }

    pub fn wait_for_idle(&mut self) -> Result<(), Error> {
        self.wait_for("the device to go idle", |region| {
            check_status(region)?;
            Ok(region.status() == Status::Idle.to_u32())
        })
    }

    pub fn wait_for_all_contexts_complete(&mut self) -> Result<(), Error> {
        self.wait_for("all contexts to be claimed", |region| {
            check_status(region)?;
            for slot in 0..NUM_SLOTS {
                if region.ready(slot)? != 0 {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        self.wait_for_idle()
    }

    /// Low level: puts `payload` and `ctx` into a free slot, with the next
    /// `ready` token. Returns the slot.
    pub fn submit(&mut self, mut ctx: WorkContext, payload: &[u8]) -> Result<usize, Error> {
        if payload.len() > BUFFER_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        let slot = self.get_context()?;
        ctx.ready = self.next_token();
        let mut region = self.device.region()?;
        region.buffer_mut(slot)?[..payload.len()].copy_from_slice(payload);
        region.submit(slot, &ctx)?;
        tracing::debug!(
            "slot {slot}: token {} bank {} offset {:#x} size {}",
            ctx.ready,
            ctx.bank,
            ctx.offset,
            ctx.size
        );
        Ok(slot)
    }

    /// Sends one payload of at most 256 KiB.
    pub fn program(&mut self, bank: Bank, offset: u32, data: &[u8], opts: Program) -> Result<(), Error> {
        validate_offset(bank, offset)?;
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > BUFFER_SIZE {
            return Err(Error::PayloadTooLarge(data.len()));
        }

        let packed = if opts.compress {
            Some(lzma::compress(data)?).filter(|p| p.len() * 10 <= data.len() * 9)
        } else {
            None
        };
        let ctx = WorkContext {
            size: data.len() as u32,
            offset,
            erase: opts.erase.into(),
            erase_bytes: if opts.erase { data.len() as i32 } else { 0 },
            compressed_size: packed.as_ref().map_or(0, |p| p.len() as u32),
            expected_sha256: sha256(data),
            bank: bank.to_u32(),
            action: Action::EraseAndFlash.to_u32(),
            ..Default::default()
        };
        if let Some(packed) = &packed {
            tracing::debug!("compressed {} -> {} bytes", data.len(), packed.len());
        }

        self.device.region()?.set_upload_in_progress(true);
        self.submit(ctx, packed.as_deref().unwrap_or(data))?;
        self.device.region()?.set_upload_in_progress(false);

        if opts.blocking {
            self.wait_for_all_contexts_complete()?;
        }
        Ok(())
    }

    /// Erases `size` bytes at `offset`, or the whole external chip.
    pub fn erase(&mut self, bank: Bank, offset: u32, size: u32, whole_chip: bool) -> Result<(), Error> {
        validate_offset(bank, offset)?;
        if whole_chip {
            if bank != Bank::External {
                return Err(Error::InvalidErase("whole chip erase only applies to external flash"));
            }
            if offset != 0 || size != 0 {
                return Err(Error::InvalidErase("whole chip erase takes no offset or size"));
            }
        } else if size == 0 {
            return Err(Error::InvalidErase("size must be positive"));
        }
        let erase_bytes =
            i32::try_from(size).map_err(|_| Error::InvalidErase("size does not fit the context"))?;

        let ctx = WorkContext {
            offset,
            erase: 1,
            erase_bytes,
            expected_sha256: sha256(&[]),
            bank: bank.to_u32(),
            action: Action::EraseAndFlash.to_u32(),
            ..Default::default()
        };
        self.submit(ctx, &[])?;
        self.wait_for_all_contexts_complete()
    }

    /// SHA-256 of every 256 KiB window of `[offset, offset + size)`.
    pub fn read_hashes(&mut self, bank: Bank, offset: u32, size: u32) -> Result<Vec<[u8; SHA256_LEN]>, Error> {
        validate_offset(bank, offset)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let windows = size.div_ceil(HASH_CHUNK_SIZE) as usize;
        if windows * SHA256_LEN > BUFFER_SIZE {
            return Err(Error::PayloadTooLarge(size as usize));
        }

        let ctx = WorkContext {
            offset,
            size,
            bank: bank.to_u32(),
            action: Action::Hash.to_u32(),
            ..Default::default()
        };
        self.device.region()?.set_download_in_progress(true);
        let slot = self.submit(ctx, &[])?;
        self.wait_for("a hash response", |region| {
            check_status(region)?;
            Ok(region.response_ready(slot)?)
        })?;

        let mut region = self.device.region()?;
        let hashes = region.buffer(slot)?[..windows * SHA256_LEN]
            .chunks_exact(SHA256_LEN)
            .map(|raw| {
                let mut digest = [0; SHA256_LEN];
                digest.copy_from_slice(raw);
                digest
            })
            .collect();
        region.release(slot)?;
        region.set_download_in_progress(false);
        Ok(hashes)
    }

    /// Writes an image of any size, sending only the chunks the device does not
    /// already hold. Internal banks take a single context's worth.
    pub fn flash(&mut self, bank: Bank, offset: u32, data: &[u8]) -> Result<FlashReport, Error> {
        validate_offset(bank, offset)?;
        match bank {
            Bank::External => self.flash_external(offset, data),
            Bank::Internal1 | Bank::Internal2 => {
                let data = pad(data, INTFLASH_SECTOR_SIZE);
                if data.len() > BUFFER_SIZE {
                    return Err(Error::PayloadTooLarge(data.len()));
                }
                if u64::from(offset) + data.len() as u64 > u64::from(INTFLASH_BANK_SIZE) {
                    return Err(Error::OutOfRange {
                        offset,
                        len: data.len(),
                        size: INTFLASH_BANK_SIZE,
                    });
                }
                self.program(bank, offset, &data, Program::default())?;
                let chunks = usize::from(!data.is_empty());
                Ok(FlashReport {
                    chunks,
                    sent: chunks,
                    bytes: data.len(),
                })
            }
        }
    }

    fn flash_external(&mut self, offset: u32, data: &[u8]) -> Result<FlashReport, Error> {
        let (flash_size, erase_size) = self.geometry()?;
        let data = pad(data, erase_size.max(1));
        if u64::from(offset) + data.len() as u64 > u64::from(flash_size) {
            return Err(Error::OutOfRange {
                offset,
                len: data.len(),
                size: flash_size,
            });
        }

        let device_hashes = self.read_hashes(Bank::External, offset, data.len() as u32)?;
        let chunk_size = HASH_CHUNK_SIZE as usize;
        let total = data.len().div_ceil(chunk_size);
        let changed: Vec<(u32, &[u8])> = data
            .chunks(chunk_size)
            .enumerate()
            .zip(&device_hashes)
            .filter(|((_, chunk), device_hash)| sha256(chunk) != **device_hash)
            .map(|((i, chunk), _)| (offset + (i * chunk_size) as u32, chunk))
            .collect();
        tracing::info!("{} of {} chunks differ", changed.len(), total);

        let opts = Program {
            blocking: false,
            ..Program::default()
        };
        for (i, (address, chunk)) in changed.iter().enumerate() {
            self.program(Bank::External, *address, chunk, opts)?;
            let progress = PROGRESS_MAX as usize * (i + 1) / changed.len();
            self.device.region()?.set_progress(progress as u32);
        }
        self.wait_for_all_contexts_complete()?;

        Ok(FlashReport {
            chunks: total,
            sent: changed.len(),
            bytes: data.len(),
        })
    }
}

fn check_status(region: &Region<'_>) -> Result<(), Error> {
    match region.status() {
        status if is_error(status) => Err(Error::Device(status)),
        _ => Ok(()),
    }
}

fn free_slot(region: &Region<'_>) -> Result<Option<usize>, Error> {
    for slot in 0..NUM_SLOTS {
        if region.ready(slot)? == 0 {
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

fn validate_offset(bank: Bank, offset: u32) -> Result<(), Error> {
    let (base, align) = match bank {
        Bank::External => (EXTFLASH_BASE, EXTFLASH_ALIGN),
        Bank::Internal1 | Bank::Internal2 => (INTFLASH_BASE, INTFLASH_SECTOR_SIZE),
    };
    if offset >= base {
        return Err(Error::AbsoluteOffset { bank, offset });
    }
    if offset % align != 0 {
        return Err(Error::NotAligned { bank, offset, align });
    }
    Ok(())
}

/// Pads with erased bytes up to a multiple of `align`.
fn pad(data: &[u8], align: u32) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize(data.len().next_multiple_of(align as usize), 0xff);
    padded
}
