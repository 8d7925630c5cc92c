// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::{
    BUFFER_SIZE, EXTFLASH_PAGE_SIZE, HASH_CHUNK_SIZE, INTFLASH_DEFAULT_ERASE, INTFLASH_SECTOR_SIZE,
    NUM_SLOTS, SHA256_LEN,
};
use embedded_storage::nor_flash::NorFlash;
use host_protocol::{layout, Action, Bank, Region, Status, WorkContext};

use crate::board::{Board, Decompressor, EraseCursor, ExternalFlash, Hasher, Span, System};
use crate::gui::Gui;
use crate::{Config, Fault, ReleasePolicy};

/// Transfer pipeline stage.
///
/// Stages that wait on the flash return to the caller instead of looping, and are
/// simply entered again on the next tick.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Decompressing,
    CheckHashRam,
    Erase,
    EraseFinish,
    Program,
    CheckHashFlash,
    /// Absorbing. Only a reset leaves it.
    Error(Fault),
}

/// What the main loop should do after [`Manager::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Power button pressed: reset the MCU.
    Reset,
}

/// Bookkeeping for the claimed context.
#[derive(Debug, Clone, Copy)]
struct Job {
    slot: usize,
    /// Decoded from the active context copy.
    ctx: WorkContext,
    bank: Bank,
    erase: bool,
    /// Rounded erase length. Zero on the external bank means the whole chip.
    erase_len: u32,
    cursor: EraseCursor,
    programmed: u32,
    released: bool,
}

/// The device side of the mailbox and the transfer state machine.
pub struct Manager<X, I, H, D, S> {
    board: Board<X, I, H, D, S>,
    config: Config,
    state: State,
    /// `ready` token of the next context to claim.
    expected: u32,
    job: Option<Job>,
    gui: Gui,
}

impl<X, I, H, D, S> Manager<X, I, H, D, S> {
    pub fn new(board: Board<X, I, H, D, S>, config: Config) -> Self {
        Self {
            board,
            config,
            state: State::Idle,
            expected: 1,
            job: None,
            gui: Gui::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn expected_counter(&self) -> u32 {
        self.expected
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn board(&self) -> &Board<X, I, H, D, S> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<X, I, H, D, S> {
        &mut self.board
    }

    pub fn into_board(self) -> Board<X, I, H, D, S> {
        self.board
    }

    /// Bytes programmed so far and total bytes of the active context.
    pub fn job_progress(&self) -> Option<(u32, u32)> {
        self.job.map(|job| (job.programmed, job.ctx.size))
    }
}

impl<X, I, H, D, S> Manager<X, I, H, D, S>
where
    X: ExternalFlash,
    I: NorFlash,
    H: Hasher,
    D: Decompressor,
    S: System,
{
    /// Zeroes the region and publishes the external flash geometry.
    pub fn boot(&mut self, region: &mut Region<'_>) {
        region.clear();
        let size = self.board.ext.size();
        let min_erase = self.board.ext.smallest_erase_size();
        region.set_flash_geometry(size, min_erase);
        self.board.ext.enable_memory_mapped();
        self.state = State::Idle;
        self.expected = 1;
        self.job = None;
        self.gui = Gui::new();
        info!("booted, external flash {} bytes, erase size {}", size, min_erase);
    }

    /// One iteration of the main loop.
    pub fn poll(&mut self, region: &mut Region<'_>) -> Control {
        if self.board.system.power_pressed() {
            info!("power button pressed, resetting");
            return Control::Reset;
        }
        self.tick(region);
        Control::Continue
    }

    /// Advances the status screen animations. Called from a timer.
    pub fn animate(&mut self, region: &Region<'_>) {
        let view = self.gui.view(&region.header(), true);
        self.board.system.draw(&view);
    }

    /// Runs the current stage once.
    pub fn tick(&mut self, region: &mut Region<'_>) {
        self.board.system.refresh_watchdog();
        self.draw(region);

        let result = match (self.state, self.job.take()) {
            (State::Idle, _) => self.idle(region),
            (State::Error(fault), job) => {
                self.job = job;
                Ok(State::Error(fault))
            }
            (state, None) => {
                warn!("{:?} without an active context", state);
                Ok(State::Idle)
            }
            (state, Some(mut job)) => {
                let next = match state {
                    State::Decompressing => self.decompress(region, &mut job),
                    State::CheckHashRam => self.check_hash_ram(region, &job),
                    State::Erase => self.erase(region, &mut job),
                    State::EraseFinish => self.erase_finish(),
                    State::Program => self.program(region, &mut job),
                    State::CheckHashFlash => self.check_hash_flash(region, &mut job),
                    State::Idle | State::Error(_) => Ok(state),
                };
                if next != Ok(State::Idle) {
                    self.job = Some(job);
                }
                next
            }
        };

        let next = match result {
            Ok(next) => next,
            Err(fault) => {
                error!("context failed: {}", fault);
                self.set_status(region, fault.status());
                State::Error(fault)
            }
        };
        if next != self.state {
            debug!("{:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    fn draw(&mut self, region: &Region<'_>) {
        let view = self.gui.view(&region.header(), false);
        self.board.system.draw(&view);
    }

    fn set_status(&mut self, region: &mut Region<'_>, status: Status) {
        region.set_status(status);
        if self.gui.status_changed(status.to_u32()) {
            trace!("status {}", status);
            self.draw(region);
        }
    }

    fn find_ready(&self, region: &Region<'_>) -> Option<usize> {
        (0..NUM_SLOTS).find(|slot| region.ready(*slot) == Ok(self.expected))
    }

    fn idle(&mut self, region: &mut Region<'_>) -> Result<State, Fault> {
        self.board.ext.enable_memory_mapped();

        if let Some(unix) = region.take_utc_timestamp() {
            info!("setting rtc to {}", unix);
            self.board.system.set_unix_time(unix);
        }

        let Some(slot) = self.find_ready(region) else {
            self.set_status(region, Status::Idle);
            return Ok(State::Idle);
        };
        debug!("claiming slot {} with token {}", slot, self.expected);
        self.expected = match self.expected.wrapping_add(1) {
            0 => 1,
            next => next,
        };

        let action = region.context(slot)?.action;
        match Action::from_u32(action) {
            Ok(Action::Hash) => {
                self.hash_action(region, slot)?;
                Ok(State::Idle)
            }
            Ok(Action::EraseAndFlash) => self.start(region, slot),
            Err(_) => {
                warn!("slot {}: unknown action {}", slot, action);
                Err(Fault::BadParameter)
            }
        }
    }

    /// Hash-only action: one digest per 256 KiB window, written into the slot
    /// buffer. The host frees the slot once it has read the response.
    fn hash_action(&mut self, region: &mut Region<'_>, slot: usize) -> Result<(), Fault> {
        let ctx = region.context(slot)?;
        let bank = ctx.bank()?;
        let end = ctx
            .offset
            .checked_add(ctx.size)
            .filter(|end| *end <= self.board.bank_size(bank))
            .ok_or(Fault::BadParameter)?;
        let windows = ctx.size.div_ceil(HASH_CHUNK_SIZE) as usize;
        if windows * SHA256_LEN > BUFFER_SIZE {
            warn!("hash response of {} windows does not fit", windows);
            return Err(Fault::BadParameter);
        }

        info!("hashing {:?} {:#x}..{:#x} in {} windows", bank, ctx.offset, end, windows);
        self.set_status(region, Status::Hash);
        let chunk = self.config.chunk();
        for i in 0..windows {
            self.board.system.refresh_watchdog();
            self.draw(region);
            let offset = ctx.offset + i as u32 * HASH_CHUNK_SIZE;
            let len = (end - offset).min(HASH_CHUNK_SIZE);
            let digest = self.board.hash_span(Span { bank, offset, len }, chunk)?;
            region.buffer_mut(slot)?[i * SHA256_LEN..(i + 1) * SHA256_LEN].copy_from_slice(&digest);
        }
        region.set_response_ready(slot)?;
        Ok(())
    }

    /// Claims an erase-and-flash context and kicks off the erase.
    fn start(&mut self, region: &mut Region<'_>, slot: usize) -> Result<State, Fault> {
        let ctx = region.claim(slot)?;
        let mut job = self.validate(slot, ctx)?;
        let chunk = self.config.chunk();

        if ctx.size != 0 && self.config.skip_unchanged {
            self.set_status(region, Status::Hash);
            let span = Span {
                bank: job.bank,
                offset: ctx.offset,
                len: ctx.size,
            };
            if self.board.hash_span(span, chunk)? == ctx.expected_sha256 {
                info!("{:?} {:#x}: {} bytes unchanged, skipping", job.bank, ctx.offset, ctx.size);
                region.release(slot)?;
                return Ok(State::Idle);
            }
        }

        if job.erase
            && job.bank == Bank::External
            && job.erase_len != 0
            && self.config.skip_erased
            && self.board.ext_is_erased(ctx.offset, job.erase_len, chunk)
        {
            debug!("{:#x}: {} bytes already erased", ctx.offset, job.erase_len);
            job.erase = false;
        }

        if job.erase {
            self.set_status(region, Status::Erase);
            if job.bank == Bank::External && job.erase_len != 0 {
                job.cursor = EraseCursor {
                    offset: ctx.offset,
                    remaining: job.erase_len,
                };
                self.board.ext.disable_memory_mapped();
                self.board.ext.erase(&mut job.cursor);
            }
        } else {
            // Stay busy until programming completes.
            self.set_status(region, Status::Prog);
        }

        self.job = Some(job);
        Ok(State::Decompressing)
    }

    /// Checks a freshly claimed context before anything touches the flash.
    fn validate(&self, slot: usize, ctx: WorkContext) -> Result<Job, Fault> {
        let bank = ctx.bank().map_err(|_| {
            warn!("slot {}: invalid bank {}", slot, ctx.bank);
            Fault::BadParameter
        })?;
        if ctx.size as usize > BUFFER_SIZE
            || ctx.compressed_size as usize > BUFFER_SIZE
            || ctx.erase_bytes < 0
        {
            warn!("slot {}: sizes out of range", slot);
            return Err(Fault::BadParameter);
        }

        let erase_bytes = ctx.erase_bytes as u32;
        let (granule, erase_len) = match bank {
            Bank::External => {
                let granule = self.board.ext.smallest_erase_size().max(1);
                let len = match erase_bytes {
                    0 => 0,
                    n => round_up(n, granule).ok_or(Fault::BadParameter)?,
                };
                (granule, len)
            }
            Bank::Internal1 | Bank::Internal2 => {
                let len = match erase_bytes {
                    0 => INTFLASH_DEFAULT_ERASE,
                    n => round_up(n, INTFLASH_SECTOR_SIZE).ok_or(Fault::BadParameter)?,
                };
                (INTFLASH_SECTOR_SIZE, len)
            }
        };

        if ctx.offset % granule != 0 && (ctx.wants_erase() || bank.is_internal()) {
            warn!("slot {}: offset {:#x} not aligned to {}", slot, ctx.offset, granule);
            return Err(Fault::NotAligned);
        }

        let bank_size = self.board.bank_size(bank);
        let fits = |len: u32| ctx.offset.checked_add(len).is_some_and(|end| end <= bank_size);
        if !fits(ctx.size) || (ctx.wants_erase() && !fits(erase_len)) {
            warn!("slot {}: {:#x} beyond {:?}", slot, ctx.offset, bank);
            return Err(Fault::BadParameter);
        }

        Ok(Job {
            slot,
            ctx,
            bank,
            erase: ctx.wants_erase(),
            erase_len,
            cursor: EraseCursor::default(),
            programmed: 0,
            released: false,
        })
    }

    fn decompress(&mut self, region: &mut Region<'_>, job: &mut Job) -> Result<State, Fault> {
        let ctx = job.ctx;
        let size = ctx.size as usize;
        let result = {
            let (payload, scratch) = region.payload_and_scratch(job.slot)?;
            if ctx.is_compressed() {
                let n = self
                    .board
                    .decompressor
                    .inflate(scratch, &payload[..ctx.compressed_size as usize]);
                if n == 0 || n != size {
                    warn!("inflated {} bytes, expected {}", n, size);
                    Err(Fault::BadDecompress)
                } else {
                    debug!("inflated {} -> {} bytes", ctx.compressed_size, n);
                    Ok(())
                }
            } else {
                scratch[..size].copy_from_slice(&payload[..size]);
                Ok(())
            }
        };

        region.set_active_buffer(layout::address(layout::DECOMPRESS_BUFFER));
        if self.config.release == ReleasePolicy::AfterCopy {
            release(region, job)?;
        }
        result.map(|()| State::CheckHashRam)
    }

    fn check_hash_ram(&mut self, region: &Region<'_>, job: &Job) -> Result<State, Fault> {
        let data = &region.decompress_buffer()[..job.ctx.size as usize];
        let digest = self.board.hash_ram(data, self.config.chunk());
        if digest != job.ctx.expected_sha256 {
            warn!("payload hash mismatch in ram");
            return Err(Fault::BadHashRam);
        }
        Ok(State::Erase)
    }

    fn erase(&mut self, region: &mut Region<'_>, job: &mut Job) -> Result<State, Fault> {
        self.board.ext.disable_memory_mapped();
        if !job.erase {
            return Ok(State::Program);
        }
        self.set_status(region, Status::Erase);

        match job.bank {
            Bank::External if job.erase_len == 0 => {
                info!("erasing whole chip");
                self.board.ext.chip_erase();
                Ok(State::EraseFinish)
            }
            Bank::External => {
                if self.board.ext.erase(&mut job.cursor) {
                    Ok(State::EraseFinish)
                } else {
                    trace!("erase at {:#x}, {} left", job.cursor.offset, job.cursor.remaining);
                    Ok(State::Erase)
                }
            }
            Bank::Internal1 | Bank::Internal2 => {
                debug!("erasing {:?} {:#x}+{}", job.bank, job.ctx.offset, job.erase_len);
                self.board.erase_internal(Span {
                    bank: job.bank,
                    offset: job.ctx.offset,
                    len: job.erase_len,
                })?;
                Ok(State::Program)
            }
        }
    }

    fn erase_finish(&mut self) -> Result<State, Fault> {
        self.board.ext.disable_memory_mapped();
        if self.board.ext.is_idle() {
            Ok(State::Program)
        } else {
            Ok(State::EraseFinish)
        }
    }

    fn program(&mut self, region: &mut Region<'_>, job: &mut Job) -> Result<State, Fault> {
        self.board.ext.disable_memory_mapped();
        self.set_status(region, Status::Prog);

        let size = job.ctx.size;
        if job.programmed >= size {
            return Ok(State::CheckHashFlash);
        }
        let data = &region.decompress_buffer()[..size as usize];

        match job.bank {
            Bank::External => {
                let address = job.ctx.offset + job.programmed;
                let room = EXTFLASH_PAGE_SIZE - address % EXTFLASH_PAGE_SIZE;
                let n = (size - job.programmed).min(room);
                let start = job.programmed as usize;
                self.board
                    .ext
                    .page_program(address, &data[start..start + n as usize]);
                job.programmed += n;
                Ok(State::Program)
            }
            Bank::Internal1 | Bank::Internal2 => {
                self.board
                    .program_internal(job.bank, job.ctx.offset, data, self.config.chunk())?;
                job.programmed = size;
                Ok(State::CheckHashFlash)
            }
        }
    }

    fn check_hash_flash(&mut self, region: &mut Region<'_>, job: &mut Job) -> Result<State, Fault> {
        let span = Span {
            bank: job.bank,
            offset: job.ctx.offset,
            len: job.ctx.size,
        };
        if self.board.hash_span(span, self.config.chunk())? != job.ctx.expected_sha256 {
            warn!("flash hash mismatch at {:?} {:#x}", job.bank, job.ctx.offset);
            return Err(Fault::BadHashFlash);
        }
        release(region, job)?;
        info!("{:?} {:#x}: {} bytes written and verified", job.bank, job.ctx.offset, job.ctx.size);
        Ok(State::Idle)
    }
}

fn release(region: &mut Region<'_>, job: &mut Job) -> Result<(), Fault> {
    if !job.released {
        region.release(job.slot)?;
        job.released = true;
        debug!("released slot {}", job.slot);
    }
    Ok(())
}

fn round_up(value: u32, granule: u32) -> Option<u32> {
    value
        .checked_add(granule - 1)
        .map(|v| v / granule * granule)
}
