// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

/// Simulated board description.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// External flash size in bytes.
    pub flash_size: u32,
    /// Smallest external erase block in bytes.
    pub erase_size: u32,
    /// Polls a block erase keeps the external chip busy.
    pub erase_busy_ticks: u32,
    /// Polls a chip erase keeps the external chip busy.
    pub chip_erase_busy_ticks: u32,
    /// External flash image, loaded at boot when it exists.
    pub image: Option<PathBuf>,
    /// Device ticks the host waits for before giving up.
    pub tick_budget: u64,
    /// Device ticks between two display animation steps.
    pub animate_every: u32,
    pub device: manager::Config,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            flash_size: 16 << 20,
            erase_size: 4 << 10,
            erase_busy_ticks: 2,
            chip_erase_busy_ticks: 64,
            image: None,
            tick_budget: 10_000_000,
            animate_every: 64,
            device: manager::Config::default(),
        }
    }
}
