// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// When a claimed slot is handed back to the host.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// As soon as the payload sits in the decompression buffer, so the host can
    /// upload the next chunk while this one is erased and programmed.
    #[default]
    AfterCopy,
    /// Only once the programmed flash has been verified.
    AfterVerify,
}

/// Device-side policy knobs.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub release: ReleasePolicy,
    /// Hash the destination before writing and skip the context when it already matches.
    pub skip_unchanged: bool,
    /// Skip an external erase when the target range already reads all `0xFF`.
    pub skip_erased: bool,
    /// Bytes hashed, scanned or programmed between two watchdog refreshes in the
    /// synchronous loops.
    pub watchdog_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            release: ReleasePolicy::AfterCopy,
            skip_unchanged: true,
            skip_erased: true,
            watchdog_interval: 64 << 10,
        }
    }
}

impl Config {
    /// Interval actually used by the loops. Never zero, always a whole number of
    /// internal flash words.
    pub(crate) fn chunk(&self) -> usize {
        let words = (self.watchdog_interval / consts::INTFLASH_WORD_SIZE).max(1);
        (words * consts::INTFLASH_WORD_SIZE) as usize
    }
}
