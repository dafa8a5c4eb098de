//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the addresses the boot transition deals with.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address resolved through the page tables. |
//! | [`PageFrameNumber`] | The index of a 4 KiB physical frame (`address >> 12`). |
//!
//! Page table entries store frame numbers, never full addresses. Converting
//! between the two is always explicit:
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_0000);
//! let pfn = pa.frame_number();
//! assert_eq!(pfn.as_u64(), 0x100);
//! assert_eq!(pfn.base_address(), pa);
//! ```
//!
//! All types are `#[repr(transparent)]` over `u64`, so they cost nothing at
//! runtime and can be placed into `#[repr(C)]` handoff structures.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_frame_number;
mod physical_address;
mod virtual_address;

pub use page_frame_number::PageFrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Shift turning a byte address into a frame number.
pub const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Mask selecting the in-page offset of an address.
pub const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

/// Align `x` down to the nearest multiple of `a` (power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1234, 0x1000), 0x1000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (power of two).
///
/// Returns `None` if the aligned value does not fit into 64 bits.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
/// assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
/// assert_eq!(align_up(u64::MAX, 0x1000), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> Option<u64> {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

/// Number of base pages needed to cover `bytes`.
///
/// ```rust
/// # use kernel_memory_addresses::size_to_pages;
/// assert_eq!(size_to_pages(0), 0);
/// assert_eq!(size_to_pages(1), 1);
/// assert_eq!(size_to_pages(0x2001), 3);
/// ```
#[inline]
#[must_use]
pub const fn size_to_pages(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers_agree_on_page_boundaries() {
        for x in [0u64, 1, 0xFFF, 0x1000, 0x1001, 0xFFFF_F000] {
            let down = align_down(x, PAGE_SIZE);
            let up = align_up(x, PAGE_SIZE).unwrap();
            assert!(down <= x && x <= up);
            assert_eq!(down & PAGE_OFFSET_MASK, 0);
            assert_eq!(up & PAGE_OFFSET_MASK, 0);
            assert!(up - down <= PAGE_SIZE);
        }
    }

    #[test]
    fn frame_numbers_round_trip_through_addresses() {
        let pa = PhysicalAddress::new(0x0000_0012_3456_7000);
        assert!(pa.is_page_aligned());
        let pfn = pa.frame_number();
        assert_eq!(pfn.as_u64(), 0x0000_0012_3456_7000 >> PAGE_SHIFT);
        assert_eq!(pfn.base_address(), pa);
        assert_eq!(pfn.next().base_address(), pa + PAGE_SIZE);
    }

    #[test]
    fn offsets_are_reported_within_the_page() {
        let va = VirtualAddress::new(0xFFFF_8000_0000_0123);
        assert!(!va.is_page_aligned());
        assert_eq!(va.page_offset(), 0x123);
        assert_eq!(va.page_base(), VirtualAddress::new(0xFFFF_8000_0000_0000));
    }

    #[test]
    fn checked_arithmetic_refuses_to_wrap() {
        assert_eq!(VirtualAddress::new(u64::MAX - 0xFFF).checked_add(PAGE_SIZE), None);
        assert_eq!(
            PhysicalAddress::new(0x1000).checked_add(PAGE_SIZE),
            Some(PhysicalAddress::new(0x2000))
        );
    }
}
