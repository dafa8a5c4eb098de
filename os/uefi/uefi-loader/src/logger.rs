//! Loader log backend: every record goes to the QEMU debug console and, while
//! boot services are up, to the firmware console as well.

use core::sync::atomic::{AtomicBool, Ordering};
use kernel_qemu::qemu_trace;
use kernel_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct UefiLogger {
    max_level: LevelFilter,
    console_mirror: AtomicBool,
}

static LOGGER: SyncOnceCell<UefiLogger> = SyncOnceCell::new();

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level,
            console_mirror: AtomicBool::new(true),
        }
    }

    /// Installs the logger. Call once, before anything logs.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        let max_level = self.max_level;
        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(logger)
    }

    /// Stops mirroring to the firmware console.
    ///
    /// Must happen before boot services are exited.
    pub fn exit_boot_services(&self) {
        self.console_mirror.store(false, Ordering::Release);
    }

    fn mirrors_to_console(&self) -> bool {
        self.console_mirror.load(Ordering::Acquire)
    }
}

/// Stops the installed logger's console mirror, if there is one.
pub fn detach_console() {
    if let Some(logger) = LOGGER.get() {
        logger.exit_boot_services();
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        qemu_trace!("[{}] {}: {}\n", record.level(), record.target(), record.args());

        if self.mirrors_to_console() {
            uefi::println!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}
