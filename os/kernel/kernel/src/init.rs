//! # Processor initialization
//!
//! Brings one i686 processor from the loader's state into the kernel's
//! execution environment:
//!
//! 1. pick the structures: the static bootstrap set, or a carved buffer,
//! 2. bind the processor block,
//! 3. build the GDT, the IDT and the main TSS,
//! 4. wire up the double fault and NMI paths ([`FatalTrapStrategy`]),
//! 5. load GDTR, IDTR and TR, drop to [`RunLevel::Passive`],
//! 6. reload the segment registers, clear EFLAGS and set `CR0.WP`,
//! 7. identify the processor.
//!
//! Afterwards [`switch_boot_stack`] moves execution onto the boot stack.

use crate::cpuid::identify;
use crate::gdt::selectors::{DF_TSS, NMI_TSS, R0_CODE, R0_PB, SYS_TSS, USER_DATA_RPL3};
use crate::gdt::{GDT_LIMIT, GdtTargets};
use crate::idt::IDT_LIMIT;
use crate::privilege::Dpl;
use crate::processor::{DescriptorTableRegister, ProcessorControl, SegmentLoad, linear_address};
use crate::processor_block::{PROCESSOR_BLOCK_SIZE, ProcessorBinding};
use crate::run_level::RunLevel;
use crate::structures::{
    BootProcessorStructures, ProcessorStructures, SharedTables, StructuresError, carve,
};
use crate::traps::{self, FatalEntries, KTrapFrame, TrapEntries, TrapVector};
use crate::tss::{FatalTaskState, TSS_SIZE};
use kernel_registers::eflags::Eflags;
use log::{debug, info};

/// NPX save area kept below the initial boot stack pointer.
pub const NPX_FRAME_SIZE: usize = 0x210;

/// Alignment slack for the trap frame.
pub const KTRAP_FRAME_ALIGN: usize = 0x08;

/// Bytes reserved at the top of the boot stack before the kernel starts.
pub const BOOT_STACK_RESERVE: usize = KTRAP_FRAME_ALIGN | size_of::<KTrapFrame>() | NPX_FRAME_SIZE;

const _: () = assert!(BOOT_STACK_RESERVE == 0x29C);

/// How double faults and NMIs reach their handlers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FatalTrapStrategy {
    /// Task gates switch to a dedicated TSS with its own stack and `CR3`.
    HardwareTaskSwitch,
    /// Ring 0 interrupt gates whose handlers move to the fault stack.
    DedicatedStack,
}

impl FatalTrapStrategy {
    /// Hardware task switching where the processor supports it.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_arch = "x86") {
            Self::HardwareTaskSwitch
        } else {
            Self::DedicatedStack
        }
    }
}

impl Default for FatalTrapStrategy {
    fn default() -> Self {
        Self::native()
    }
}

/// Handler addresses the descriptor tables point at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapHandlers {
    pub entries: TrapEntries,
    pub fatal: FatalEntries,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitConfig {
    pub cpu_number: u32,
    pub strategy: FatalTrapStrategy,
    /// Linear address of the bootstrap thread.
    pub initial_thread: u32,
}

/// Everything processor initialization works on.
pub struct BootContext<'a> {
    pub bootstrap: &'a mut BootProcessorStructures,
    pub shared: &'a mut SharedTables,
    pub handlers: TrapHandlers,
}

/// Result of a processor initialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InitializedProcessor {
    /// Linear address of the processor block.
    pub processor_block: u32,
    /// Where [`switch_boot_stack`] should put the stack.
    pub boot_stack_top: u32,
}

/// Initializes the executing processor.
///
/// Without `buffer` the bootstrap structures are used; otherwise the
/// structures are carved from `buffer` and the shared IDT is reused.
///
/// # Errors
/// A buffer that cannot hold the structures is rejected before anything is
/// written.
///
/// # Safety
/// The structures in `context` and `buffer` must stay mapped at their current
/// address for as long as the processor runs; the CPU references them by
/// address. Runs with interrupts masked, once per processor.
pub unsafe fn initialize_processor<P: ProcessorControl + ?Sized>(
    cpu: &mut P,
    context: &mut BootContext<'_>,
    buffer: Option<&mut [u8]>,
    config: &InitConfig,
) -> Result<InitializedProcessor, StructuresError> {
    let structures = match buffer {
        Some(buffer) => carve(buffer)?,
        None => context.bootstrap.structures(),
    };

    // SAFETY: forwarded from the caller.
    Ok(unsafe { initialize_with(cpu, structures, context.shared, &context.handlers, config) })
}

#[allow(clippy::cast_possible_truncation)]
unsafe fn initialize_with<P: ProcessorControl + ?Sized>(
    cpu: &mut P,
    s: ProcessorStructures<'_>,
    shared: &mut SharedTables,
    handlers: &TrapHandlers,
    config: &InitConfig,
) -> InitializedProcessor {
    let gdt_base = linear_address(&raw const *s.gdt);
    let idt_base = linear_address(&raw const shared.idt);
    let tss_base = linear_address(&raw const *s.tss);
    let pb_base = linear_address(&raw const *s.processor_block);

    s.processor_block.bind(&ProcessorBinding {
        cpu_number: config.cpu_number,
        gdt: gdt_base,
        idt: idt_base,
        tss: tss_base,
        dpc_stack: s.fault_stack_top,
        initial_thread: config.initial_thread,
    });

    s.gdt.build(&GdtTargets {
        gdt: gdt_base,
        tss: tss_base,
        tss_size: TSS_SIZE as u32,
        processor_block: pb_base,
        processor_block_size: PROCESSOR_BLOCK_SIZE as u32,
    });
    traps::install(&mut shared.idt, &handlers.entries);
    s.tss.init_main(s.boot_stack_top);

    match config.strategy {
        FatalTrapStrategy::HardwareTaskSwitch => {
            let cr3 = cpu.cr3().into_bits() as u32;
            let ss = cpu.stack_segment().into_bits();

            for (vector, selector, tss, handler) in [
                (
                    TrapVector::DoubleFault,
                    DF_TSS,
                    &mut shared.double_fault_tss,
                    handlers.fatal.double_fault,
                ),
                (TrapVector::Nmi, NMI_TSS, &mut shared.nmi_tss, handlers.fatal.nmi),
            ] {
                shared.idt.set_task_gate(vector.vector(), selector);
                tss.init_fatal(&FatalTaskState {
                    handler,
                    stack: s.fault_stack_top,
                    cr3,
                    ss,
                });
                s.gdt
                    .describe_task_segment(selector, linear_address(&raw const *tss), TSS_SIZE as u32);
            }
        }
        FatalTrapStrategy::DedicatedStack => {
            shared.idt.set_interrupt_gate(
                TrapVector::DoubleFault.vector(),
                handlers.fatal.double_fault,
                R0_CODE,
                Dpl::Ring0,
            );
            shared.idt.set_interrupt_gate(TrapVector::Nmi.vector(), handlers.fatal.nmi, R0_CODE, Dpl::Ring0);
        }
    }

    debug!(
        "CPU {}: GDT {gdt_base:#010x}, IDT {idt_base:#010x}, TSS {tss_base:#010x}, PB {pb_base:#010x}, {:?}",
        config.cpu_number, config.strategy
    );

    // SAFETY: the tables are fully built and outlive the processor (caller).
    unsafe {
        cpu.load_gdt(DescriptorTableRegister::new(gdt_base, GDT_LIMIT));
        cpu.load_idt(DescriptorTableRegister::new(idt_base, IDT_LIMIT));
        cpu.load_task_register(SYS_TSS);
        cpu.set_run_level(RunLevel::Passive);
        cpu.load_segments(SegmentLoad {
            code: R0_CODE,
            data: USER_DATA_RPL3,
            processor_block: R0_PB,
        });
        cpu.set_eflags(Eflags::cleared());
        let cr0 = cpu.cr0().with_write_protect(true);
        cpu.set_cr0(cr0);
    }

    s.processor_block.run_level = RunLevel::Passive;
    s.processor_block.cpu_id = identify(cpu);

    info!("CPU {} initialized at run level {}", config.cpu_number, RunLevel::Passive);

    InitializedProcessor {
        processor_block: pb_base,
        boot_stack_top: s.boot_stack_top,
    }
}

/// Moves onto the boot stack and enters `start_kernel`.
///
/// The frame pointer is cleared and [`BOOT_STACK_RESERVE`] bytes are kept free
/// below `boot_stack_top`. The initial NPX state (`CR0.EM | MP | TS`) is pushed
/// for the first thread switch to pick up.
///
/// # Safety
/// `boot_stack_top` must be the top of a mapped, unused kernel stack. Nothing
/// on the current stack survives.
#[cfg(target_arch = "x86")]
pub unsafe fn switch_boot_stack(boot_stack_top: u32, start_kernel: extern "C" fn() -> !) -> ! {
    use kernel_registers::cr0::Cr0;

    #[allow(clippy::cast_possible_truncation)]
    let npx = Cr0::INITIAL_NPX_STATE.into_bits() as u32;
    unsafe {
        core::arch::asm!(
            "xor ebp, ebp",
            "mov esp, {stack:e}",
            "sub esp, {reserve}",
            "push {npx:e}",
            "jmp {entry:e}",
            stack = in(reg) boot_stack_top,
            reserve = const BOOT_STACK_RESERVE,
            npx = in(reg) npx,
            entry = in(reg) start_kernel,
            options(noreturn)
        );
    }
}
