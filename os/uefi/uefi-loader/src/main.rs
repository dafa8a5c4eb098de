//! # UEFI Loader Entry
//!
//! Runs the boot transition from the EFI entry point:
//!
//! 1. install the logger and the Boot Loader Protocol,
//! 2. look for a display adapter (GOP first, UGA as fallback),
//! 3. register the firmware memory map and the loader image,
//! 4. build the page tables, exit boot services and commit the new root.
//!
//! Failures before boot services are gone are reported to firmware as a
//! [`Status`](uefi::Status). Afterwards there is nobody left to report to.

#![cfg_attr(target_os = "uefi", no_std, no_main)]

#[cfg(target_os = "uefi")]
mod efi {
    extern crate alloc;

    use alloc::boxed::Box;
    use core::convert::Infallible;
    use kernel_info::boot::KernelBootInfo;
    use kernel_info::memory::{KERNEL_VIRTUAL_BASE, KERNEL_VIRTUAL_BASE_32};
    use kernel_vmem::{MapError, MappingList, PagingLayout};
    use log::{LevelFilter, error, info, warn};
    use uefi::boot::{self, MemoryType};
    use uefi::prelude::*;
    use uefi::proto::console::gop::GraphicsOutput;
    use uefi::{Guid, Identify, guid};
    use uefi_loader::firmware::SnapshotError;
    use uefi_loader::logger::UefiLogger;
    use uefi_loader::protocol::{self, ProtocolError};
    use uefi_loader::sequencer::{CommitError, ExitSequencer, SequencerConfig};
    use uefi_loader::tracing::trace_boot_info;
    use uefi_loader::uefi_firmware::{self, Cr3Register, FirmwareFrameArena, UefiFirmware};

    #[global_allocator]
    static ALLOCATOR: uefi::allocator::Allocator = uefi::allocator::Allocator;

    /// Mapping List slots; one per firmware descriptor plus one per table.
    const MAPPING_CAPACITY: usize = 1024;

    /// Page-table frames the loader may allocate.
    const TABLE_FRAMES: usize = 2048;

    /// `EFI_UGA_DRAW_PROTOCOL`, the pre-GOP display protocol.
    const UGA_DRAW: Guid = guid!("982c298b-f4fa-41cb-b838-77aa688fb839");

    #[derive(Debug, thiserror::Error)]
    enum LoaderError {
        #[error("firmware call failed: {0}")]
        Firmware(#[from] uefi::Error),
        #[error(transparent)]
        Protocol(#[from] ProtocolError),
        #[error(transparent)]
        Snapshot(#[from] SnapshotError),
        #[error(transparent)]
        Map(#[from] MapError),
        #[error(transparent)]
        Commit(#[from] CommitError),
    }

    impl LoaderError {
        fn status(&self) -> Status {
            match self {
                Self::Firmware(e) => e.status(),
                Self::Protocol(_) => Status::NOT_FOUND,
                Self::Snapshot(e) | Self::Commit(CommitError::Snapshot(e)) => Status(e.0),
                Self::Map(_) | Self::Commit(CommitError::Map(_)) => Status::OUT_OF_RESOURCES,
                Self::Commit(CommitError::FirmwareExitRejected { .. }) => Status::ABORTED,
            }
        }
    }

    #[entry]
    fn efi_main() -> Status {
        if uefi::helpers::init().is_err() {
            return Status::UNSUPPORTED;
        }
        if UefiLogger::new(LevelFilter::Debug).init().is_err() {
            return Status::ABORTED;
        }

        info!("UEFI loader reporting to QEMU");
        match boot() {
            Ok(never) => match never {},
            Err(e) => {
                error!("boot transition failed: {e}");
                e.status()
            }
        }
    }

    fn boot() -> Result<Infallible, LoaderError> {
        let protocol = protocol::install(uefi_firmware::protocol_table())?;
        match protocol.open_first_available(&[GraphicsOutput::GUID, UGA_DRAW]) {
            Ok(display) => {
                info!("display adapter: {}", display.guid);
                protocol.close(display)?;
            }
            Err(ProtocolError::Unavailable) => warn!("no display adapter found"),
            Err(e) => return Err(e.into()),
        }

        let image = uefi_firmware::loaded_image_region()?;
        info!("loader image at {} ({} bytes)", image.base, image.size);

        // Everything that must survive the root switch is allocated before the
        // firmware memory map is registered, so it lands in identity-mapped ranges.
        let boot_info = Box::leak(Box::new(KernelBootInfo::default()));
        let mut firmware = UefiFirmware::new()?;
        let mut arena = Box::new(FirmwareFrameArena::<TABLE_FRAMES>::new());
        let config = SequencerConfig::default();
        let cursor = match config.layout {
            PagingLayout::FourLevel => KERNEL_VIRTUAL_BASE,
            PagingLayout::TwoLevel => KERNEL_VIRTUAL_BASE_32,
        };
        let mut list = Box::new(MappingList::<MAPPING_CAPACITY>::new(cursor));

        let map = boot::memory_map(MemoryType::LOADER_DATA)?;
        uefi_firmware::register_firmware_memory(&mut *list, &map)?;
        drop(map);

        let mut root_register = Cr3Register;
        let mut sequencer = ExitSequencer::new(&mut firmware, &mut *arena, &mut root_register, config);
        let committed = unsafe { sequencer.commit_address_space(&mut *list, image)? };

        *boot_info = committed.boot_info();
        trace_boot_info(boot_info);
        halt()
    }

    fn halt() -> ! {
        loop {
            unsafe {
                core::arch::asm!("cli", "hlt", options(nomem, nostack));
            }
        }
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("uefi-loader runs as a UEFI application; build it for an *-unknown-uefi target");
}
