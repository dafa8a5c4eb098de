//! # Memory Layout

use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};

/// Base of the kernel segment on 64-bit targets.
pub const KSEG0_BASE: u64 = 0xFFFF_F800_0000_0000;

/// Base of the kernel segment on 32-bit targets.
pub const KSEG0_BASE_32: u64 = 0x8000_0000;

/// Offset of the first kernel allocation inside the kernel segment.
pub const KSEG0_KERNEL_BASE: u64 = 0x0180_0000;

/// First virtual address the loader hands out on 64-bit targets.
pub const KERNEL_VIRTUAL_BASE: VirtualAddress = VirtualAddress::new(KSEG0_BASE + KSEG0_KERNEL_BASE);

/// First virtual address the loader hands out on 32-bit targets.
pub const KERNEL_VIRTUAL_BASE_32: VirtualAddress =
    VirtualAddress::new(KSEG0_BASE_32 + KSEG0_KERNEL_BASE);

/// Size of each per-processor kernel stack (boot and fault stack).
pub const KERNEL_STACK_SIZE: usize = 0x4000;

/// Number of entries in the global descriptor table.
pub const GDT_ENTRIES: usize = 128;

/// Number of entries in the interrupt descriptor table.
pub const IDT_ENTRIES: usize = 256;

const _: () = {
    assert!((KERNEL_STACK_SIZE as u64).is_multiple_of(PAGE_SIZE));
    assert!(KSEG0_KERNEL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_VIRTUAL_BASE.as_u64() > KSEG0_BASE);
    assert!(KERNEL_VIRTUAL_BASE_32.as_u64() < (1 << 32));
};
