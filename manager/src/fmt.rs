// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Logging shim: `defmt` on the device, `log` in the simulator, nothing otherwise.
//!
//! `defmt` wins when both are enabled. Format strings must stay within what both backends accept (`{}`, `{:?}`, `{:#x}`).

#![macro_use]
#![allow(unused_macros)]

macro_rules! log_impl {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(all(feature = "log", not(feature = "defmt")))]
            ::log::$level!($s $(, $x)*);
            #[cfg(not(any(feature = "defmt", feature = "log")))]
            {
                $( let _ = &$x; )*
            }
        }
    };
}

macro_rules! trace {
    ($($arg:tt)*) => { log_impl!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_impl!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_impl!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_impl!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_impl!(error, $($arg)*) };
}
