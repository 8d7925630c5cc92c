// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device side of the flashing mailbox.
//!
//! The host drops work contexts into the Communication Region; [`Manager`] claims
//! them in `ready` token order and runs each one through
//! decompress, RAM hash check, erase, program and flash hash check, one step per
//! [`Manager::tick`] so the main loop can keep the watchdog and the display alive.

#![no_std]

mod fmt;

mod board;
mod config;
mod fault;
pub mod gui;
mod machine;

pub use board::{Board, Decompressor, EraseCursor, ExternalFlash, Hasher, Sha256Hasher, Span, System};
pub use config::{Config, ReleasePolicy};
pub use fault::Fault;
pub use gui::{Gui, View};
pub use machine::{Control, Manager, State};
