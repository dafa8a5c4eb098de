//! # Processor structures
//!
//! Each processor owns a GDT, a TSS, a processor block and two kernel stacks.
//! The bootstrap processor uses [`BootProcessorStructures`], reserved
//! statically in [`BOOT_PROCESSOR`]. Secondary processors are handed a raw
//! buffer which is carved up as follows:
//!
//! ```text
//! buffer start
//!   └─ round up to 4 KiB ──────────────┐
//!                                      │ boot stack   (KERNEL_STACK_SIZE)
//!   boot stack top ────────────────────┤
//!                                      │ fault stack  (KERNEL_STACK_SIZE)
//!   fault stack top = GDT ─────────────┤
//!                                      │ GDT          (GDT_SIZE)
//!   processor block ───────────────────┤
//!                                      │ processor block
//!   TSS ───────────────────────────────┤
//!                                      │ TSS          (TSS_SIZE)
//!   end ───────────────────────────────┘
//! ```
//!
//! The IDT and the two fatal-trap TSSes are shared by all processors and live
//! in [`SharedTables`].

use crate::gdt::{GDT_SIZE, Gdt};
use crate::idt::Idt;
use crate::processor::linear_address;
use crate::processor_block::{PROCESSOR_BLOCK_SIZE, ProcessorBlock};
use crate::tss::{Ktss, TSS_SIZE};
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_memory_addresses::PAGE_SIZE;
use kernel_sync::StaticCell;
use thiserror::Error;

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

/// Worst-case buffer size for [`carve`], with the start one byte past a page.
pub const STRUCTURES_BUFFER_SIZE: usize =
    PAGE_BYTES - 1 + 2 * KERNEL_STACK_SIZE + GDT_SIZE + PROCESSOR_BLOCK_SIZE + TSS_SIZE;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum StructuresError {
    #[error("structures buffer holds {available} bytes, carving needs {required}")]
    BufferTooSmall { available: usize, required: usize },
    #[error("structures buffer wraps the address space")]
    AddressOverflow,
}

/// A kernel stack. Stacks grow down from [`KernelStack::top`].
#[repr(C, align(4096))]
pub struct KernelStack([u8; KERNEL_STACK_SIZE]);

impl KernelStack {
    pub const ZEROED: Self = Self([0; KERNEL_STACK_SIZE]);

    /// Linear address one past the highest byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn top(&self) -> u32 {
        linear_address(&raw const *self).wrapping_add(KERNEL_STACK_SIZE as u32)
    }
}

/// One processor's view of its structures.
pub struct ProcessorStructures<'a> {
    pub gdt: &'a mut Gdt,
    pub processor_block: &'a mut ProcessorBlock,
    pub tss: &'a mut Ktss,
    pub boot_stack_top: u32,
    pub fault_stack_top: u32,
}

/// Structures all processors share.
pub struct SharedTables {
    pub idt: Idt,
    pub double_fault_tss: Ktss,
    pub nmi_tss: Ktss,
}

impl SharedTables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            idt: Idt::new(),
            double_fault_tss: Ktss::ZEROED,
            nmi_tss: Ktss::ZEROED,
        }
    }
}

impl Default for SharedTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Statically reserved structures of the bootstrap processor.
pub struct BootProcessorStructures {
    gdt: Gdt,
    processor_block: ProcessorBlock,
    tss: Ktss,
    boot_stack: KernelStack,
    fault_stack: KernelStack,
}

impl BootProcessorStructures {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            gdt: Gdt::new(),
            processor_block: ProcessorBlock::EMPTY,
            tss: Ktss::ZEROED,
            boot_stack: KernelStack::ZEROED,
            fault_stack: KernelStack::ZEROED,
        }
    }

    pub fn structures(&mut self) -> ProcessorStructures<'_> {
        ProcessorStructures {
            boot_stack_top: self.boot_stack.top(),
            fault_stack_top: self.fault_stack.top(),
            gdt: &mut self.gdt,
            processor_block: &mut self.processor_block,
            tss: &mut self.tss,
        }
    }
}

impl Default for BootProcessorStructures {
    fn default() -> Self {
        Self::new()
    }
}

/// The bootstrap processor's structures; taken once by the kernel entry.
pub static BOOT_PROCESSOR: StaticCell<BootProcessorStructures> =
    StaticCell::new(BootProcessorStructures::new());

/// Tables shared by all processors; taken once by the kernel entry.
pub static SHARED_TABLES: StaticCell<SharedTables> = StaticCell::new(SharedTables::new());

/// Where each structure goes inside a buffer starting at `start`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CarveLayout {
    pub start: usize,
    pub boot_stack_top: usize,
    pub fault_stack_top: usize,
    pub gdt: usize,
    pub processor_block: usize,
    pub tss: usize,
    pub end: usize,
}

impl CarveLayout {
    /// Computes the layout for a buffer at `start`.
    ///
    /// # Errors
    /// [`StructuresError::AddressOverflow`] if the layout runs past the top of
    /// the address space.
    pub const fn compute(start: usize) -> Result<Self, StructuresError> {
        let Some(base) = start.checked_next_multiple_of(PAGE_BYTES) else {
            return Err(StructuresError::AddressOverflow);
        };
        let Some(end) = base.checked_add(2 * KERNEL_STACK_SIZE + GDT_SIZE + PROCESSOR_BLOCK_SIZE + TSS_SIZE)
        else {
            return Err(StructuresError::AddressOverflow);
        };

        let boot_stack_top = base + KERNEL_STACK_SIZE;
        let fault_stack_top = boot_stack_top + KERNEL_STACK_SIZE;
        let gdt = fault_stack_top;
        let processor_block = gdt + GDT_SIZE;
        let tss = processor_block + PROCESSOR_BLOCK_SIZE;

        Ok(Self {
            start,
            boot_stack_top,
            fault_stack_top,
            gdt,
            processor_block,
            tss,
            end,
        })
    }

    /// Bytes a buffer at `start` must span.
    #[must_use]
    pub const fn required(&self) -> usize {
        self.end - self.start
    }
}

/// Carves a secondary processor's structures out of `buffer`.
///
/// The GDT and TSS are zeroed and the processor block is reset; the stacks
/// are left as they are. Nothing is written if the buffer is too small.
///
/// # Errors
/// See [`StructuresError`].
#[allow(clippy::cast_possible_truncation, clippy::cast_ptr_alignment)]
pub fn carve(buffer: &mut [u8]) -> Result<ProcessorStructures<'_>, StructuresError> {
    let layout = CarveLayout::compute(buffer.as_ptr() as usize)?;
    if buffer.len() < layout.required() {
        return Err(StructuresError::BufferTooSmall {
            available: buffer.len(),
            required: layout.required(),
        });
    }

    let (_, rest) = buffer.split_at_mut(layout.gdt - layout.start);
    let (gdt, rest) = rest.split_at_mut(GDT_SIZE);
    let (pb, rest) = rest.split_at_mut(PROCESSOR_BLOCK_SIZE);
    let (tss, _) = rest.split_at_mut(TSS_SIZE);

    // SAFETY: each region is exclusively borrowed, large enough and aligned
    // (page aligned GDT; the processor block and TSS follow at multiples of
    // their alignment). Every region is initialized before it is referenced.
    let (gdt, processor_block, tss) = unsafe {
        let gdt = gdt.as_mut_ptr().cast::<Gdt>();
        gdt.write_bytes(0, 1);
        let pb = pb.as_mut_ptr().cast::<ProcessorBlock>();
        pb.write(ProcessorBlock::EMPTY);
        let tss = tss.as_mut_ptr().cast::<Ktss>();
        tss.write_bytes(0, 1);
        (&mut *gdt, &mut *pb, &mut *tss)
    };

    log::trace!(
        "carved processor structures: GDT {:#x}, PB {:#x}, TSS {:#x}",
        layout.gdt,
        layout.processor_block,
        layout.tss
    );

    Ok(ProcessorStructures {
        gdt,
        processor_block,
        tss,
        boot_stack_top: layout.boot_stack_top as u32,
        fault_stack_top: layout.fault_stack_top as u32,
    })
}

const _: () = {
    assert!(GDT_SIZE % align_of::<ProcessorBlock>() == 0);
    assert!(PROCESSOR_BLOCK_SIZE % align_of::<Ktss>() == 0);
    assert!(PAGE_BYTES % align_of::<Gdt>() == 0);
    assert!(size_of::<KernelStack>() == KERNEL_STACK_SIZE);
};
