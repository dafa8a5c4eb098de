use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress};

/// CR3, the page-table base register (PCID disabled).
///
/// Holds the frame of the top-level table: the PML4 with 4-level paging, the
/// page directory with 32-bit 2-level paging. Writing it switches the address
/// space; every later access resolves through the new tables.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    #[bits(3)]
    __reserved_0_2: u8,

    /// Bit 3: page-level write-through for the root table.
    pub write_through: bool,

    /// Bit 4: page-level cache disable for the root table.
    pub cache_disable: bool,

    #[bits(7)]
    __reserved_5_11: u8,

    /// Bits 12–51: frame number of the root table.
    #[bits(40)]
    root_frame: u64,

    #[bits(12)]
    __reserved_52_63: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` with write-back caching.
    #[must_use]
    pub const fn from_root(root: PageFrameNumber) -> Self {
        Self::new().with_root_frame(root.as_u64())
    }

    /// Physical address of the root table.
    #[must_use]
    pub const fn root_address(self) -> PhysicalAddress {
        PageFrameNumber::new(self.root_frame()).base_address()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(u64::from(cr3))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits() as u32;
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_frame_occupies_bits_12_and_up() {
        let cr3 = Cr3::from_root(PageFrameNumber::new(0x1234));
        assert_eq!(cr3.into_bits(), 0x0123_4000);
        assert_eq!(cr3.root_address(), PhysicalAddress::new(0x0123_4000));
    }

    #[test]
    fn cache_bits_do_not_disturb_the_root() {
        let cr3 = Cr3::from_root(PageFrameNumber::new(0x80)).with_cache_disable(true);
        assert_eq!(cr3.into_bits(), 0x8_0010);
        assert_eq!(cr3.root_address(), PhysicalAddress::new(0x8_0000));
    }
}
