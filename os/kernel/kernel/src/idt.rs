//! # Interrupt Descriptor Table
//!
//! 256 eight-byte gates. An interrupt gate enters a handler through a code
//! selector and a 32-bit offset; a task gate ignores the offset and switches
//! to the task whose TSS selector it names.
//!
//! ```text
//!  63            48 47 46 45 44   40 39      32 31          16 15           0
//! +----------------+--+-----+-------+----------+--------------+--------------+
//! | offset [31:16] |P | DPL | type  | reserved | selector     | offset[15:0] |
//! +----------------+--+-----+-------+----------+--------------+--------------+
//! ```
//!
//! The access word (bits 32–47) is `0x8000 | (type | dpl << 5) << 8`.
//! The table is shared by all processors; [`crate::traps::install`] fills it.

use crate::gdt::selectors::SegmentSelector;
use crate::privilege::Dpl;
use bitfield_struct::bitfield;
use kernel_info::memory::IDT_ENTRIES;

/// Size of the IDT in bytes.
pub const IDT_SIZE: usize = IDT_ENTRIES * size_of::<IdtGate>();

/// Value for the IDTR limit field.
#[allow(clippy::cast_possible_truncation)]
pub const IDT_LIMIT: u16 = (IDT_SIZE - 1) as u16;

/// Gate kinds used by the kernel.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum GateType {
    /// 32-bit task gate.
    Task = 0x05,
    /// 32-bit interrupt gate (interrupts masked on entry).
    Interrupt = 0x0E,
    /// 32-bit trap gate.
    Trap = 0x0F,
    #[doc(hidden)]
    Invalid = 0x00,
}

impl GateType {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v {
            0x05 => Self::Task,
            0x0E => Self::Interrupt,
            0x0F => Self::Trap,
            _ => Self::Invalid,
        }
    }
}

/// The access word of a gate.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct GateAccess {
    #[bits(8)]
    __reserved: u8,
    #[bits(5)]
    pub gate_type: GateType,
    #[bits(2)]
    pub dpl: Dpl,
    pub present: bool,
}

impl GateAccess {
    /// Present gate of the given type and privilege.
    #[inline]
    #[must_use]
    pub const fn of(gate_type: GateType, dpl: Dpl) -> Self {
        Self::new().with_gate_type(gate_type).with_dpl(dpl).with_present(true)
    }
}

/// One IDT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct IdtGate {
    pub offset_low: u16,
    #[bits(16)]
    pub selector: SegmentSelector,
    #[bits(16)]
    pub access: GateAccess,
    pub offset_high: u16,
}

impl IdtGate {
    /// Interrupt gate entering `handler` through `selector`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn interrupt(handler: u32, selector: SegmentSelector, dpl: Dpl) -> Self {
        Self::new()
            .with_offset_low(handler as u16)
            .with_offset_high((handler >> 16) as u16)
            .with_selector(selector)
            .with_access(GateAccess::of(GateType::Interrupt, dpl))
    }

    /// Task gate switching to the task described by `tss`.
    #[must_use]
    pub const fn task(tss: SegmentSelector) -> Self {
        Self::new()
            .with_selector(tss)
            .with_access(GateAccess::of(GateType::Task, Dpl::Ring0))
    }

    /// The 32-bit handler offset.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u32 {
        (self.offset_high() as u32) << 16 | self.offset_low() as u32
    }
}

#[repr(C, align(8))]
#[derive(Clone)]
pub struct Idt([IdtGate; IDT_ENTRIES]);

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    /// A table of not-present gates.
    #[must_use]
    pub const fn new() -> Self {
        Self([IdtGate::new(); IDT_ENTRIES])
    }

    #[inline]
    #[must_use]
    pub const fn gate(&self, vector: u8) -> IdtGate {
        self.0[vector as usize]
    }

    #[inline]
    pub const fn set_gate(&mut self, vector: u8, gate: IdtGate) {
        self.0[vector as usize] = gate;
    }

    #[inline]
    pub const fn set_interrupt_gate(&mut self, vector: u8, handler: u32, selector: SegmentSelector, dpl: Dpl) {
        self.set_gate(vector, IdtGate::interrupt(handler, selector, dpl));
    }

    #[inline]
    pub const fn set_task_gate(&mut self, vector: u8, tss: SegmentSelector) {
        self.set_gate(vector, IdtGate::task(tss));
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, IdtGate)> + '_ {
        (0..=u8::MAX).map(|v| (v, self.gate(v)))
    }
}

const _: () = assert!(IDT_SIZE == 2048 && IDT_LIMIT == 0x7FF);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdt::selectors::{DF_TSS, R0_CODE};

    #[test]
    fn access_word_encoding() {
        assert_eq!(GateAccess::of(GateType::Interrupt, Dpl::Ring0).into_bits(), 0x8E00);
        assert_eq!(GateAccess::of(GateType::Interrupt, Dpl::Ring3).into_bits(), 0xEE00);
        assert_eq!(GateAccess::of(GateType::Task, Dpl::Ring0).into_bits(), 0x8500);
    }

    #[test]
    fn interrupt_gate_splits_the_offset() {
        let g = IdtGate::interrupt(0x8012_3456, R0_CODE, Dpl::Ring0);
        assert_eq!(g.offset_low(), 0x3456);
        assert_eq!(g.offset_high(), 0x8012);
        assert_eq!(g.offset(), 0x8012_3456);
        assert_eq!(g.into_bits(), 0x8012_8E00_0008_3456);
    }

    #[test]
    fn task_gate_names_the_tss() {
        let g = IdtGate::task(DF_TSS);
        assert_eq!(g.selector(), DF_TSS);
        assert_eq!(g.offset(), 0);
        assert_eq!(g.access().gate_type(), GateType::Task);
        assert_eq!(g.into_bits(), 0x0000_8500_0050_0000);
    }

    #[test]
    fn fresh_table_is_all_absent() {
        let idt = Idt::new();
        assert!(idt.iter().all(|(_, g)| !g.access().present()));
        assert_eq!(idt.iter().count(), 256);
    }
}
