//! # QEMU Debug Console Output
//!
//! Early-boot diagnostics through QEMU's debug console (`-debugcon`). Every
//! byte written to I/O port `0x402` shows up on the host, which makes this
//! the one output path that survives exiting firmware services, switching
//! page tables and reloading descriptor tables.
//!
//! * [`qemu_trace!`] formats straight to the port without allocating.
//! * [`QemuLogger`] is a [`log::Log`] backend on top of it.
//! * [`debug_print`] is the function-pointer friendly form used by tables that
//!   hand the sink to loosely coupled modules.
//!
//! With the `enabled` feature switched off (or on a non-x86 target) all of the
//! above compile to no-ops.
//!
//! ```bash
//! qemu-system-x86_64 -debugcon stdio ...
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn dbg_putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; there is nobody to report a failure to.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64"))))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[inline]
    pub const fn qemu_write(_: fmt::Arguments) {}
}

/// Writes pre-formatted arguments to the debug console.
#[inline]
pub fn debug_print(args: core::fmt::Arguments) {
    qemu_fmt::qemu_write(args);
}

#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
