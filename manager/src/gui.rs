// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! What the segment-style status screen shows. Rendering is the board's job.

use consts::PROGRESS_MAX;
use host_protocol::{is_error, Header, Status};

/// Idle animation steps before the sleep indicator lights up.
pub const SLEEP_THRESHOLD: u8 = 5;
/// Phases of the "z" animation while sleeping.
pub const SLEEP_PHASES: u8 = 4;
/// Phases of the run animation while busy.
pub const RUN_PHASES: u8 = 10;
/// Number of progress segments.
pub const PROGRESS_SEGMENTS: u32 = PROGRESS_MAX;

/// One frame of the status screen.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    /// Displayed status: `status_override` when set, else `status`.
    pub status: u32,
    pub progress: u32,
    pub sleeping: bool,
    pub sleep_phase: u8,
    /// Lit run segment, `None` while sleeping or in error.
    pub run_phase: Option<u8>,
    pub upload_in_progress: bool,
    pub download_in_progress: bool,
}

impl View {
    fn is(&self, status: Status) -> bool {
        self.status == status.to_u32()
    }

    fn bad_hash(&self) -> bool {
        self.is(Status::BadHashRam) || self.is(Status::BadHashFlash)
    }

    pub fn idle(&self) -> bool {
        self.is(Status::Idle)
    }

    pub fn prog(&self) -> bool {
        self.is(Status::Prog)
    }

    pub fn erase(&self) -> bool {
        self.is(Status::Erase)
    }

    pub fn error(&self) -> bool {
        is_error(self.status)
    }

    pub fn hash(&self) -> bool {
        self.is(Status::Hash) || self.bad_hash()
    }

    pub fn mismatch(&self) -> bool {
        self.bad_hash()
    }

    pub fn flash(&self) -> bool {
        self.is(Status::BadHashFlash)
    }

    pub fn ram(&self) -> bool {
        self.is(Status::BadHashRam)
    }

    /// Whether the `i`-th "z" (0..3) of the sleep animation is lit.
    pub fn z(&self, i: u8) -> bool {
        self.sleeping && self.sleep_phase > i
    }

    pub fn segment(&self, i: u32) -> bool {
        i < PROGRESS_SEGMENTS && i <= self.progress
    }
}

/// Animation state of the status screen.
#[derive(Debug, Default)]
pub struct Gui {
    counter_to_sleep: u8,
    sleep_phase: u8,
    run_phase: u8,
    last_status: Option<u32>,
}

impl Gui {
    pub fn new() -> Self {
        Self::default()
    }

    fn sleeping(&self) -> bool {
        self.counter_to_sleep == SLEEP_THRESHOLD
    }

    /// Builds the next frame. `step` advances the animations.
    pub fn view(&mut self, header: &Header, step: bool) -> View {
        let status = header.displayed_status();
        let idle = status == Status::Idle.to_u32();
        if !idle {
            self.counter_to_sleep = 0;
        }

        if step {
            if !self.sleeping() && idle {
                self.counter_to_sleep += 1;
            }
            self.sleep_phase = if self.sleeping() {
                (self.sleep_phase + 1) % SLEEP_PHASES
            } else {
                0
            };
            let running = !self.sleeping() && !is_error(status);
            self.run_phase = if running {
                (self.run_phase + 1) % RUN_PHASES
            } else {
                0
            };
        }

        let sleeping = self.sleeping();
        View {
            status,
            progress: header.progress,
            sleeping,
            sleep_phase: self.sleep_phase,
            run_phase: (!sleeping && !is_error(status)).then_some(self.run_phase),
            upload_in_progress: header.upload_in_progress != 0,
            download_in_progress: header.download_in_progress != 0,
        }
    }

    /// Returns `true` the first time a displayed status value is seen.
    pub(crate) fn status_changed(&mut self, status: u32) -> bool {
        let changed = self.last_status != Some(status);
        self.last_status = Some(status);
        changed
    }
}
