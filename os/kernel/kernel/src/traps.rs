//! # Trap dispatch
//!
//! All 256 IDT vectors are populated. A vector listed in [`TrapVector`] enters
//! its own stub at the privilege level the table assigns. Every other vector
//! enters the catch-all, which reports [`UnexpectedTrap`] and halts.
//!
//! | Vectors | DPL | |
//! |---------|-----|-|
//! | `0x00`–`0x02`, `0x05`–`0x0E`, `0x10`–`0x13` | 0 | processor exceptions |
//! | `0x03`, `0x04` | 3 | breakpoint and overflow, raised by `int3`/`into` |
//! | `0x2A`–`0x2E` | 3 | system service vectors |
//!
//! Vector `0x0F` is reserved by the architecture and stays on the catch-all.

use crate::gdt::selectors::R0_CODE;
use crate::idt::Idt;
use crate::privilege::Dpl;
use thiserror::Error;

/// A vector reached the catch-all handler.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("unexpected trap {0:#04x}")]
pub struct UnexpectedTrap(pub u8);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrapKind {
    /// Restartable; the saved EIP points at the faulting instruction.
    Fault,
    Trap,
    Abort,
    Interrupt,
    /// Kernel service vector.
    Service,
}

/// Classification of a defined vector.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrapDescriptor {
    pub vector: u8,
    pub name: &'static str,
    pub dpl: Dpl,
    pub kind: TrapKind,
}

/// Vectors with a dedicated handler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TrapVector {
    DivideError = 0x00,
    Debug = 0x01,
    Nmi = 0x02,
    Breakpoint = 0x03,
    Overflow = 0x04,
    BoundRange = 0x05,
    InvalidOpcode = 0x06,
    DeviceNotAvailable = 0x07,
    DoubleFault = 0x08,
    CoprocessorOverrun = 0x09,
    InvalidTss = 0x0A,
    SegmentNotPresent = 0x0B,
    StackFault = 0x0C,
    GeneralProtection = 0x0D,
    PageFault = 0x0E,
    X87Error = 0x10,
    AlignmentCheck = 0x11,
    MachineCheck = 0x12,
    SimdError = 0x13,
    TickCount = 0x2A,
    CallbackReturn = 0x2B,
    Assertion = 0x2C,
    DebugService = 0x2D,
    SystemCall = 0x2E,
}

impl TrapVector {
    pub const ALL: [Self; 24] = [
        Self::DivideError,
        Self::Debug,
        Self::Nmi,
        Self::Breakpoint,
        Self::Overflow,
        Self::BoundRange,
        Self::InvalidOpcode,
        Self::DeviceNotAvailable,
        Self::DoubleFault,
        Self::CoprocessorOverrun,
        Self::InvalidTss,
        Self::SegmentNotPresent,
        Self::StackFault,
        Self::GeneralProtection,
        Self::PageFault,
        Self::X87Error,
        Self::AlignmentCheck,
        Self::MachineCheck,
        Self::SimdError,
        Self::TickCount,
        Self::CallbackReturn,
        Self::Assertion,
        Self::DebugService,
        Self::SystemCall,
    ];

    #[inline]
    #[must_use]
    pub const fn vector(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_vector(vector: u8) -> Option<Self> {
        let mut i = 0;
        while i < Self::ALL.len() {
            if Self::ALL[i] as u8 == vector {
                return Some(Self::ALL[i]);
            }
            i += 1;
        }
        None
    }

    /// Whether the processor pushes an error code for this vector.
    #[must_use]
    pub const fn has_error_code(self) -> bool {
        matches!(
            self,
            Self::DoubleFault
                | Self::InvalidTss
                | Self::SegmentNotPresent
                | Self::StackFault
                | Self::GeneralProtection
                | Self::PageFault
                | Self::AlignmentCheck
        )
    }

    #[must_use]
    pub const fn descriptor(self) -> TrapDescriptor {
        use TrapKind::{Abort, Fault, Interrupt, Service, Trap};
        let (name, dpl, kind) = match self {
            Self::DivideError => ("divide error", Dpl::Ring0, Fault),
            Self::Debug => ("debug", Dpl::Ring0, Trap),
            Self::Nmi => ("non-maskable interrupt", Dpl::Ring0, Interrupt),
            Self::Breakpoint => ("breakpoint", Dpl::Ring3, Trap),
            Self::Overflow => ("overflow", Dpl::Ring3, Trap),
            Self::BoundRange => ("bound range exceeded", Dpl::Ring0, Fault),
            Self::InvalidOpcode => ("invalid opcode", Dpl::Ring0, Fault),
            Self::DeviceNotAvailable => ("device not available", Dpl::Ring0, Fault),
            Self::DoubleFault => ("double fault", Dpl::Ring0, Abort),
            Self::CoprocessorOverrun => ("coprocessor segment overrun", Dpl::Ring0, Abort),
            Self::InvalidTss => ("invalid TSS", Dpl::Ring0, Fault),
            Self::SegmentNotPresent => ("segment not present", Dpl::Ring0, Fault),
            Self::StackFault => ("stack fault", Dpl::Ring0, Fault),
            Self::GeneralProtection => ("general protection", Dpl::Ring0, Fault),
            Self::PageFault => ("page fault", Dpl::Ring0, Fault),
            Self::X87Error => ("x87 floating-point error", Dpl::Ring0, Fault),
            Self::AlignmentCheck => ("alignment check", Dpl::Ring0, Fault),
            Self::MachineCheck => ("machine check", Dpl::Ring0, Abort),
            Self::SimdError => ("SIMD floating-point error", Dpl::Ring0, Fault),
            Self::TickCount => ("tick count", Dpl::Ring3, Service),
            Self::CallbackReturn => ("callback return", Dpl::Ring3, Service),
            Self::Assertion => ("assertion", Dpl::Ring3, Service),
            Self::DebugService => ("debug service", Dpl::Ring3, Service),
            Self::SystemCall => ("system call", Dpl::Ring3, Service),
        };
        TrapDescriptor {
            vector: self.vector(),
            name,
            dpl,
            kind,
        }
    }
}

/// Looks up the classification of `vector`.
///
/// # Errors
/// Vectors without a dedicated handler yield [`UnexpectedTrap`].
pub const fn classify(vector: u8) -> Result<TrapDescriptor, UnexpectedTrap> {
    match TrapVector::from_vector(vector) {
        Some(v) => Ok(v.descriptor()),
        None => Err(UnexpectedTrap(vector)),
    }
}

/// Saved state of an interrupted i686 context.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct KTrapFrame {
    pub dbg_ebp: u32,
    pub dbg_eip: u32,
    pub dbg_arg_mark: u32,
    pub dbg_arg_pointer: u32,
    pub temp_seg_cs: u32,
    pub temp_esp: u32,
    pub dr0: u32,
    pub dr1: u32,
    pub dr2: u32,
    pub dr3: u32,
    pub dr6: u32,
    pub dr7: u32,
    pub seg_gs: u32,
    pub seg_es: u32,
    pub seg_ds: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub previous_previous_mode: u32,
    pub exception_list: u32,
    pub seg_fs: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebx: u32,
    pub ebp: u32,
    pub error_code: u32,
    pub eip: u32,
    pub seg_cs: u32,
    pub eflags: u32,
    pub hardware_esp: u32,
    pub hardware_seg_ss: u32,
    pub v86_es: u32,
    pub v86_ds: u32,
    pub v86_fs: u32,
    pub v86_gs: u32,
}

const _: () = assert!(size_of::<KTrapFrame>() == 0x8C);

/// Vector pushed by the catch-all stub. One stub serves every unlisted
/// vector, so it cannot name the one that fired.
pub const UNLISTED_VECTOR: u32 = 0x100;

/// What a trap stub leaves on the stack before entering the dispatcher.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapStackFrame {
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

impl TrapStackFrame {
    /// `None` for [`UNLISTED_VECTOR`].
    #[must_use]
    pub fn vector(&self) -> Option<u8> {
        u8::try_from(self.vector).ok()
    }
}

/// Entry addresses of the trap stubs, indexed by vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapEntries {
    unexpected: u32,
    entries: [u32; 256],
}

impl TrapEntries {
    /// Every vector enters `unexpected`.
    #[must_use]
    pub const fn new(unexpected: u32) -> Self {
        Self {
            unexpected,
            entries: [unexpected; 256],
        }
    }

    /// Entries for every defined vector from `entry`.
    #[must_use]
    pub fn from_fn(unexpected: u32, mut entry: impl FnMut(TrapVector) -> u32) -> Self {
        let mut this = Self::new(unexpected);
        for v in TrapVector::ALL {
            this.set(v, entry(v));
        }
        this
    }

    pub const fn set(&mut self, vector: TrapVector, entry: u32) {
        self.entries[vector.vector() as usize] = entry;
    }

    #[must_use]
    pub const fn entry(&self, vector: u8) -> u32 {
        self.entries[vector as usize]
    }

    #[must_use]
    pub const fn unexpected(&self) -> u32 {
        self.unexpected
    }
}

/// Entry points of the double fault and NMI handlers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FatalEntries {
    pub double_fault: u32,
    pub nmi: u32,
}

/// Fills all 256 gates as interrupt gates on the kernel code segment.
pub fn install(idt: &mut Idt, entries: &TrapEntries) {
    for vector in 0..=u8::MAX {
        idt.set_interrupt_gate(vector, entries.unexpected(), R0_CODE, Dpl::Ring0);
    }

    for v in TrapVector::ALL {
        let d = v.descriptor();
        idt.set_interrupt_gate(d.vector, entries.entry(d.vector), R0_CODE, d.dpl);
    }
}

/// Logs a trap that reached a stub.
pub fn report_trap(frame: &TrapStackFrame) {
    let Some(vector) = frame.vector() else {
        log::error!("unexpected trap on an unlisted vector at {:#06x}:{:#010x}", frame.cs, frame.eip);
        return;
    };
    match classify(vector) {
        Ok(d) => log::error!(
            "{} (vector {:#04x}, error {:#x}) at {:#06x}:{:#010x}",
            d.name,
            d.vector,
            frame.error_code,
            frame.cs,
            frame.eip
        ),
        Err(e) => log::error!("{e} at {:#06x}:{:#010x}", frame.cs, frame.eip),
    }
}

/// Stops the processor for good.
pub fn halt() -> ! {
    loop {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        core::hint::spin_loop();
    }
}

#[cfg(target_arch = "x86")]
pub mod stubs {
    //! i686 entry stubs. Each one normalizes the stack to a
    //! [`TrapStackFrame`](super::TrapStackFrame) and enters the dispatcher.

    use super::{FatalEntries, TrapEntries, TrapStackFrame, TrapVector, UNLISTED_VECTOR, halt, report_trap};
    use crate::processor::linear_address;
    use crate::processor_block::ProcessorBlock;

    extern "C" fn dispatch(frame: &TrapStackFrame) -> ! {
        // Raw line first; the log backend may not be installed yet.
        kernel_qemu::qemu_trace!("trap {:#04x} at {:#010x}\n", frame.vector, frame.eip);
        report_trap(frame);
        halt()
    }

    #[unsafe(naked)]
    unsafe extern "C" fn trap_common() {
        core::arch::naked_asm!(
            "cld",
            "push esp",
            "call {dispatch}",
            "ud2",
            dispatch = sym dispatch,
        );
    }

    macro_rules! stub {
        ($name:ident, $vector:expr) => {
            #[unsafe(naked)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    "push 0",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym trap_common,
                );
            }
        };
        ($name:ident, $vector:expr, error_code) => {
            #[unsafe(naked)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym trap_common,
                );
            }
        };
    }

    // A task switch pushes at most the error code; there is no interrupted
    // EIP, CS or EFLAGS on the new stack.
    macro_rules! task_entry {
        ($name:ident, $vector:expr) => {
            #[unsafe(naked)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    "push 0",
                    "push 0",
                    "push 0",
                    "push 0",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym trap_common,
                );
            }
        };
        ($name:ident, $vector:expr, error_code) => {
            #[unsafe(naked)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    "pop eax",
                    "push 0",
                    "push 0",
                    "push 0",
                    "push eax",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym trap_common,
                );
            }
        };
    }

    // Entered through an interrupt gate on whatever stack was current; moves
    // to the fault stack recorded in the processor block first.
    macro_rules! fault_stack_entry {
        ($name:ident, $vector:expr, $load_error:literal) => {
            #[unsafe(naked)]
            unsafe extern "C" fn $name() {
                core::arch::naked_asm!(
                    $load_error,
                    "mov ecx, esp",
                    "mov esp, dword ptr fs:[{dpc}]",
                    "push dword ptr [ecx + 8]",
                    "push dword ptr [ecx + 4]",
                    "push dword ptr [ecx]",
                    "push eax",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    dpc = const core::mem::offset_of!(ProcessorBlock, dpc_stack),
                    common = sym trap_common,
                );
            }
        };
    }

    task_entry!(task_02, 0x02);
    task_entry!(task_08, 0x08, error_code);
    fault_stack_entry!(fault_stack_02, 0x02, "xor eax, eax");
    fault_stack_entry!(fault_stack_08, 0x08, "pop eax");

    stub!(trap_unexpected, UNLISTED_VECTOR);
    stub!(trap_00, 0x00);
    stub!(trap_01, 0x01);
    stub!(trap_02, 0x02);
    stub!(trap_03, 0x03);
    stub!(trap_04, 0x04);
    stub!(trap_05, 0x05);
    stub!(trap_06, 0x06);
    stub!(trap_07, 0x07);
    stub!(trap_08, 0x08, error_code);
    stub!(trap_09, 0x09);
    stub!(trap_0a, 0x0A, error_code);
    stub!(trap_0b, 0x0B, error_code);
    stub!(trap_0c, 0x0C, error_code);
    stub!(trap_0d, 0x0D, error_code);
    stub!(trap_0e, 0x0E, error_code);
    stub!(trap_10, 0x10);
    stub!(trap_11, 0x11, error_code);
    stub!(trap_12, 0x12);
    stub!(trap_13, 0x13);
    stub!(trap_2a, 0x2A);
    stub!(trap_2b, 0x2B);
    stub!(trap_2c, 0x2C);
    stub!(trap_2d, 0x2D);
    stub!(trap_2e, 0x2E);

    fn addr(f: unsafe extern "C" fn()) -> u32 {
        linear_address(f as *const ())
    }

    /// Targets of the double fault and NMI task gates.
    #[must_use]
    pub fn task_gate_entries() -> FatalEntries {
        FatalEntries {
            double_fault: addr(task_08),
            nmi: addr(task_02),
        }
    }

    /// Targets of the double fault and NMI interrupt gates.
    #[must_use]
    pub fn fault_stack_entries() -> FatalEntries {
        FatalEntries {
            double_fault: addr(fault_stack_08),
            nmi: addr(fault_stack_02),
        }
    }

    /// Entry addresses of the regular stubs.
    #[must_use]
    pub fn entries() -> TrapEntries {
        TrapEntries::from_fn(addr(trap_unexpected), |v| {
            addr(match v {
                TrapVector::DivideError => trap_00,
                TrapVector::Debug => trap_01,
                TrapVector::Nmi => trap_02,
                TrapVector::Breakpoint => trap_03,
                TrapVector::Overflow => trap_04,
                TrapVector::BoundRange => trap_05,
                TrapVector::InvalidOpcode => trap_06,
                TrapVector::DeviceNotAvailable => trap_07,
                TrapVector::DoubleFault => trap_08,
                TrapVector::CoprocessorOverrun => trap_09,
                TrapVector::InvalidTss => trap_0a,
                TrapVector::SegmentNotPresent => trap_0b,
                TrapVector::StackFault => trap_0c,
                TrapVector::GeneralProtection => trap_0d,
                TrapVector::PageFault => trap_0e,
                TrapVector::X87Error => trap_10,
                TrapVector::AlignmentCheck => trap_11,
                TrapVector::MachineCheck => trap_12,
                TrapVector::SimdError => trap_13,
                TrapVector::TickCount => trap_2a,
                TrapVector::CallbackReturn => trap_2b,
                TrapVector::Assertion => trap_2c,
                TrapVector::DebugService => trap_2d,
                TrapVector::SystemCall => trap_2e,
            })
        })
    }
}
