//! # Processor block
//!
//! The per-processor root structure. The GDT entry behind
//! [`R0_PB`](crate::gdt::selectors::R0_PB) points here, so once `FS` is
//! loaded the running code finds its own block at `fs:0`.

use crate::cpuid::CpuIdentification;
use crate::processor::linear_address;
use crate::run_level::RunLevel;

#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessorBlock {
    /// Linear address of this block.
    pub self_address: u32,
    pub cpu_number: u32,
    /// `1 << cpu_number`.
    pub set_member: u32,
    pub gdt_base: u32,
    pub idt_base: u32,
    pub tss_base: u32,
    /// Top of the fault stack.
    pub dpc_stack: u32,
    pub run_level: RunLevel,
    pub current_thread: u32,
    pub idle_thread: u32,
    pub next_thread: u32,
    pub cpu_id: CpuIdentification,
}

/// Everything a processor block is bound to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProcessorBinding {
    pub cpu_number: u32,
    pub gdt: u32,
    pub idt: u32,
    pub tss: u32,
    pub dpc_stack: u32,
    /// The thread the processor starts out running; it doubles as idle thread.
    pub initial_thread: u32,
}

/// Size of a [`ProcessorBlock`] in bytes.
pub const PROCESSOR_BLOCK_SIZE: usize = size_of::<ProcessorBlock>();

impl ProcessorBlock {
    pub const EMPTY: Self = Self {
        self_address: 0,
        cpu_number: 0,
        set_member: 0,
        gdt_base: 0,
        idt_base: 0,
        tss_base: 0,
        dpc_stack: 0,
        run_level: RunLevel::Passive,
        current_thread: 0,
        idle_thread: 0,
        next_thread: 0,
        cpu_id: CpuIdentification::UNKNOWN,
    };

    /// Binds the block to its processor and structures.
    pub fn bind(&mut self, binding: &ProcessorBinding) {
        self.self_address = linear_address(&raw const *self);
        self.cpu_number = binding.cpu_number;
        self.set_member = 1u32.checked_shl(binding.cpu_number).unwrap_or(0);
        self.gdt_base = binding.gdt;
        self.idt_base = binding.idt;
        self.tss_base = binding.tss;
        self.dpc_stack = binding.dpc_stack;
        self.current_thread = binding.initial_thread;
        self.idle_thread = binding.initial_thread;
        self.next_thread = 0;
        self.run_level = RunLevel::Passive;
    }
}
