use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress};

/// A 64-bit page table entry, shared by all four levels of 4-level paging.
///
/// The builder only produces two shapes of entries: table references (valid,
/// writable, pointing at the next-level frame) and 4 KiB leaf mappings
/// (valid, writable, pointing at the mapped frame). Everything else stays
/// zero.
///
/// ### Bit layout
///
/// | Bits  | Field                 | Meaning |
/// |-------|-----------------------|---------|
/// | 0     | `valid`               | Entry participates in translation |
/// | 1     | `write`               | Writes allowed |
/// | 2     | `owner`               | User-mode accessible |
/// | 3     | `write_through`       | Write-through caching |
/// | 4     | `cache_disable`       | Caching disabled |
/// | 5     | `accessed`            | Set by the CPU on access |
/// | 6     | `dirty`               | Set by the CPU on write (leaf only) |
/// | 7     | `large_page`          | Leaf above the last level |
/// | 8     | `global`              | Survives CR3 reloads (leaf only) |
/// | 9–11  | `software_low`        | Ignored by hardware |
/// | 12–51 | `page_frame_number`   | Frame of the next table or the page |
/// | 52–62 | `software_high`       | Ignored by hardware |
/// | 63    | `no_execute`          | Instruction fetches fault |
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    pub valid: bool,
    pub write: bool,
    pub owner: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global: bool,
    #[bits(3)]
    pub software_low: u8,
    #[bits(40)]
    pub page_frame_number: u64,
    #[bits(11)]
    pub software_high: u16,
    pub no_execute: bool,
}

impl PageTableEntry {
    /// Valid, writable reference to a next-level table.
    #[inline]
    #[must_use]
    pub const fn table(frame: PageFrameNumber) -> Self {
        Self::new()
            .with_valid(true)
            .with_write(true)
            .with_page_frame_number(frame.as_u64())
    }

    /// Valid, writable 4 KiB mapping of `frame`.
    #[inline]
    #[must_use]
    pub const fn page(frame: PageFrameNumber) -> Self {
        Self::table(frame)
    }

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PageFrameNumber {
        PageFrameNumber::new(self.page_frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base_address()
    }
}

/// A 32-bit page table entry for 2-level (non-PAE) paging.
///
/// The low twelve bits match [`PageTableEntry`] bit for bit; the frame number
/// is limited to 20 bits and there is no execute-disable bit.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry32 {
    pub valid: bool,
    pub write: bool,
    pub owner: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global: bool,
    #[bits(3)]
    pub software_low: u8,
    #[bits(20)]
    pub page_frame_number: u32,
}

impl PageTableEntry32 {
    /// Narrows a 64-bit entry, or `None` if it cannot be expressed in 32 bits.
    #[must_use]
    pub fn narrow(entry: PageTableEntry) -> Option<Self> {
        let frame = u32::try_from(entry.page_frame_number()).ok()?;
        if frame >= 1 << 20 || entry.no_execute() || entry.software_high() != 0 {
            return None;
        }

        Some(
            Self::new()
                .with_valid(entry.valid())
                .with_write(entry.write())
                .with_owner(entry.owner())
                .with_write_through(entry.write_through())
                .with_cache_disable(entry.cache_disable())
                .with_accessed(entry.accessed())
                .with_dirty(entry.dirty())
                .with_large_page(entry.large_page())
                .with_global(entry.global())
                .with_software_low(entry.software_low())
                .with_page_frame_number(frame),
        )
    }
}

impl From<PageTableEntry32> for PageTableEntry {
    fn from(entry: PageTableEntry32) -> Self {
        // Identical low 32 bits; the upper half stays clear.
        Self::from_bits(u64::from(entry.into_bits()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_reference_sets_valid_write_and_frame() {
        let e = PageTableEntry::table(PageFrameNumber::new(0x1234));
        assert_eq!(e.into_bits(), 0x0123_4003);
        assert_eq!(e.physical_address(), PhysicalAddress::new(0x0123_4000));
        assert!(!e.no_execute());
    }

    #[test]
    fn frame_number_spans_bits_12_to_51() {
        let e = PageTableEntry::new().with_page_frame_number((1 << 40) - 1);
        assert_eq!(e.into_bits(), 0x000F_FFFF_FFFF_F000);
    }

    #[test]
    fn narrowing_keeps_the_low_word() {
        let wide = PageTableEntry::page(PageFrameNumber::new(0xABCDE)).with_global(true);
        let narrow = PageTableEntry32::narrow(wide).unwrap();
        assert_eq!(u64::from(narrow.into_bits()), wide.into_bits());
        assert_eq!(PageTableEntry::from(narrow), wide);
    }

    #[test]
    fn narrowing_rejects_frames_above_4_gib() {
        let wide = PageTableEntry::page(PageFrameNumber::new(0x10_0000));
        assert_eq!(PageTableEntry32::narrow(wide), None);
        let nx = PageTableEntry::page(PageFrameNumber::new(1)).with_no_execute(true);
        assert_eq!(PageTableEntry32::narrow(nx), None);
    }
}
