//! # Kernel Entry
//!
//! The loader jumps to `kernel_entry` with the boot info. It brings the
//! bootstrap processor up on its statically reserved structures, then leaves
//! the loader's stack for good through
//! [`switch_boot_stack`](crate::init::switch_boot_stack).

use crate::init::{
    BootContext, FatalTrapStrategy, InitConfig, InitializedProcessor, TrapHandlers, initialize_processor,
};
use crate::processor::ProcessorControl;
use crate::structures::{BootProcessorStructures, SharedTables, StructuresError};
use crate::traps::{FatalEntries, TrapEntries};
use kernel_info::boot::KernelBootInfo;
use kernel_sync::{StaticCell, SyncOnceCell};
use thiserror::Error;

/// Boot info as handed over by the loader.
pub static BOOT_INFO: SyncOnceCell<KernelBootInfo> = SyncOnceCell::new();

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("bootstrap processor structures were already taken")]
    AlreadyStarted,
    #[error(transparent)]
    Structures(#[from] StructuresError),
}

/// Pairs the regular trap entries with the fatal entries `strategy` needs.
#[must_use]
pub const fn select_handlers(
    strategy: FatalTrapStrategy,
    entries: TrapEntries,
    task_gate: FatalEntries,
    fault_stack: FatalEntries,
) -> TrapHandlers {
    let fatal = match strategy {
        FatalTrapStrategy::HardwareTaskSwitch => task_gate,
        FatalTrapStrategy::DedicatedStack => fault_stack,
    };
    TrapHandlers { entries, fatal }
}

/// Takes the bootstrap structures and initializes the executing processor
/// on them.
///
/// # Errors
/// [`EntryError::AlreadyStarted`] on every call after the first.
///
/// # Safety
/// As [`initialize_processor`]; runs on the bootstrap processor only.
pub unsafe fn start_boot_processor<P: ProcessorControl + ?Sized>(
    cpu: &mut P,
    bootstrap: &'static StaticCell<BootProcessorStructures>,
    shared: &'static StaticCell<SharedTables>,
    handlers: TrapHandlers,
    config: &InitConfig,
) -> Result<InitializedProcessor, EntryError> {
    let bootstrap = bootstrap.take().ok_or(EntryError::AlreadyStarted)?;
    let shared = shared.take().ok_or(EntryError::AlreadyStarted)?;
    let mut context = BootContext {
        bootstrap,
        shared,
        handlers,
    };

    // SAFETY: forwarded from the caller; the structures are statics.
    Ok(unsafe { initialize_processor(cpu, &mut context, None, config) }?)
}

/// Loader handoff target.
///
/// # Safety
/// Called once, by the loader, with interrupts masked and `boot_info`
/// either null or pointing at a mapped [`KernelBootInfo`].
#[cfg(target_arch = "x86")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
    use crate::init::switch_boot_stack;
    use crate::processor::NativeProcessor;
    use crate::structures::{BOOT_PROCESSOR, SHARED_TABLES};
    use crate::traps::{halt, stubs};

    kernel_qemu::qemu_trace!("Kernel reporting to QEMU!\n");
    if kernel_qemu::QemuLogger::new(log::LevelFilter::Debug).init().is_err() {
        kernel_qemu::qemu_trace!("logger already installed\n");
    }

    // SAFETY: see the function contract.
    match unsafe { boot_info.as_ref() } {
        Some(info) => {
            let _ = BOOT_INFO.set(info.clone());
        }
        None => log::warn!("no boot info from the loader"),
    }

    let strategy = FatalTrapStrategy::native();
    let handlers = select_handlers(
        strategy,
        stubs::entries(),
        stubs::task_gate_entries(),
        stubs::fault_stack_entries(),
    );
    let config = InitConfig {
        cpu_number: 0,
        strategy,
        // No thread object exists before the scheduler.
        initial_thread: 0,
    };

    // SAFETY: first and only call, on the bootstrap processor.
    match unsafe { start_boot_processor(&mut NativeProcessor, &BOOT_PROCESSOR, &SHARED_TABLES, handlers, &config) } {
        // SAFETY: the boot stack is a static and unused so far.
        Ok(done) => unsafe { switch_boot_stack(done.boot_stack_top, kernel_start) },
        Err(e) => {
            log::error!("bootstrap processor setup failed: {e}");
            halt()
        }
    }
}

/// First code on the kernel's own boot stack.
#[cfg(target_arch = "x86")]
extern "C" fn kernel_start() -> ! {
    match BOOT_INFO.get() {
        Some(info) => log::info!(
            "kernel running on its boot stack, {} memory descriptors, root {:#x}",
            info.mmap.descriptor_count(),
            info.root_table
        ),
        None => log::info!("kernel running on its boot stack"),
    }
    crate::traps::halt()
}
