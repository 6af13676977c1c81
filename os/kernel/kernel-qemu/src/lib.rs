//! # QEMU Debug Output
//!
//! Kernel log output for QEMU's debug console. Writes to I/O port `0x402`
//! appear on the host when QEMU runs with `-debugcon stdio` (or
//! `-debugcon file:debug.log`).
//!
//! * [`QemuLogger`] is the `log::Log` backend the kernel installs at boot;
//!   every crate logs through the `log` facade.
//! * [`qemu_trace!`] writes straight to the port, for the few places that run
//!   before the logger exists or must not take its path.
//!
//! Output goes through a [`DebugSink`]. [`QemuDebugPort`] is the real port; it
//! only touches hardware when built for a bare-metal target with the
//! `enabled` feature, and is a no-op otherwise.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger already set");
//! log::info!("paging enabled");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;
mod sink;

pub use logger::QemuLogger;
pub use sink::{DebugSink, QemuDebugPort, SinkWriter};

#[doc(hidden)]
pub mod qemu_fmt {
    use crate::sink::{QemuDebugPort, SinkWriter};
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments<'_>) {
        // best effort; there is nowhere to report a failed debug write
        let _ = fmt::write(&mut SinkWriter::new(&QemuDebugPort), args);
    }
}

/// `format!`-style output straight to the QEMU debug port.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
