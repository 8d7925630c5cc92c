// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! A board in a box: RAM-backed flash chips, the device state machine and a
//! host driver that talks to it through the Communication Region, the same way
//! the desktop tool does over a debug probe.

mod config;
mod device;
mod error;
mod flash;
mod host;
pub mod lzma;

pub use config::SimConfig;
pub use device::{Device, SimManager, SimSystem};
pub use error::Error;
pub use flash::{ExtStats, SimExtFlash, SimIntFlash};
pub use host::{FlashReport, Host, Program};

/// SHA-256 of `data`, as the device computes it.
pub fn sha256(data: &[u8]) -> [u8; consts::SHA256_LEN] {
    use sha2::Digest;
    sha2::Sha256::digest(data).into()
}
