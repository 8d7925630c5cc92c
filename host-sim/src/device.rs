// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use host_protocol::{layout, Region};
use manager::{Board, Control, Manager, Sha256Hasher, State, System, View};

use crate::lzma::LzmaInflater;
use crate::{Error, SimConfig, SimExtFlash, SimIntFlash};

/// Watchdog, RTC, display and power button of the simulated board.
#[derive(Debug, Default)]
pub struct SimSystem {
    pub watchdog_refreshes: u64,
    pub unix_time: Option<u32>,
    pub view: Option<View>,
    pub frames: u64,
    power: bool,
}

impl SimSystem {
    /// Latches a power button press for the next poll.
    pub fn press_power(&mut self) {
        self.power = true;
    }
}

impl System for SimSystem {
    fn refresh_watchdog(&mut self) {
        self.watchdog_refreshes += 1;
    }

    fn set_unix_time(&mut self, unix: u32) {
        tracing::info!("rtc set to {unix}");
        self.unix_time = Some(unix);
    }

    fn draw(&mut self, view: &View) {
        self.view = Some(*view);
        self.frames += 1;
    }

    fn power_pressed(&mut self) -> bool {
        std::mem::take(&mut self.power)
    }
}

pub type SimManager = Manager<SimExtFlash, SimIntFlash, Sha256Hasher, LzmaInflater, SimSystem>;

/// The device: its RAM with the Communication Region in it, and the firmware.
pub struct Device {
    mem: Vec<u8>,
    manager: SimManager,
    animate_every: u32,
    ticks: u64,
    resets: u32,
}

impl Device {
    /// Builds the board described by `config` and boots it.
    pub fn new(config: &SimConfig) -> Result<Self, Error> {
        let mut ext = SimExtFlash::new(config.flash_size, config.erase_size)?
            .with_busy_ticks(config.erase_busy_ticks, config.chip_erase_busy_ticks);
        if let Some(image) = &config.image {
            if image.exists() {
                ext.load_image(image)?;
            }
        }
        let board = Board::new(
            ext,
            SimIntFlash::new(),
            Sha256Hasher::default(),
            LzmaInflater,
            SimSystem::default(),
        );
        let mut device = Self {
            mem: vec![0; layout::REGION_SIZE],
            manager: Manager::new(board, config.device),
            animate_every: config.animate_every.max(1),
            ticks: 0,
            resets: 0,
        };
        device.boot()?;
        Ok(device)
    }

    pub fn boot(&mut self) -> Result<(), Error> {
        let mut region = Region::new(&mut self.mem)?;
        self.manager.boot(&mut region);
        Ok(())
    }

    /// One main loop iteration. A power button press reboots the device.
    pub fn tick(&mut self) -> Result<(), Error> {
        let mut region = Region::new(&mut self.mem)?;
        if self.manager.poll(&mut region) == Control::Reset {
            self.resets += 1;
            tracing::info!("device reset");
            self.manager.boot(&mut region);
        }
        self.ticks += 1;
        if self.ticks % u64::from(self.animate_every) == 0 {
            self.manager.animate(&region);
        }
        Ok(())
    }

    /// The Communication Region, as the debug probe sees it.
    pub fn region(&mut self) -> Result<Region<'_>, Error> {
        Ok(Region::new(&mut self.mem)?)
    }

    pub fn state(&self) -> State {
        self.manager.state()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn ext(&self) -> &SimExtFlash {
        &self.manager.board().ext
    }

    pub fn ext_mut(&mut self) -> &mut SimExtFlash {
        &mut self.manager.board_mut().ext
    }

    pub fn int(&self) -> &SimIntFlash {
        &self.manager.board().int
    }

    pub fn int_mut(&mut self) -> &mut SimIntFlash {
        &mut self.manager.board_mut().int
    }

    pub fn system(&self) -> &SimSystem {
        &self.manager.board().system
    }

    pub fn system_mut(&mut self) -> &mut SimSystem {
        &mut self.manager.board_mut().system
    }

    pub fn manager(&self) -> &SimManager {
        &self.manager
    }
}
