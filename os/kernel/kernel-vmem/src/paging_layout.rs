use crate::frame::PageFrame;
use crate::page_table_entry::{PageTableEntry, PageTableEntry32};
use core::fmt;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalAddress, VirtualAddress};

/// Shape of the translation hierarchy.
///
/// | Layout      | Levels | Entry  | Entries/table | Index shifts    | Index mask |
/// |-------------|--------|--------|---------------|-----------------|------------|
/// | `FourLevel` | 4      | 64 bit | 512           | 39, 30, 21, 12  | `0x1FF`    |
/// | `TwoLevel`  | 2      | 32 bit | 1024          | 22, 12          | `0x3FF`    |
///
/// Level 0 is always the root; the last level holds the 4 KiB leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PagingLayout {
    /// x86-64 long mode (PML4 → PDPT → PD → PT).
    FourLevel,
    /// i686 without PAE (PD → PT).
    TwoLevel,
}

/// Index of an entry inside one table. Always below the layout's entry count.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PagingLayout {
    /// Layout used by the current compilation target.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_arch = "x86") {
            Self::TwoLevel
        } else {
            Self::FourLevel
        }
    }

    #[inline]
    #[must_use]
    pub const fn levels(self) -> usize {
        match self {
            Self::FourLevel => 4,
            Self::TwoLevel => 2,
        }
    }

    /// Level index of the leaf tables.
    #[inline]
    #[must_use]
    pub const fn leaf_level(self) -> usize {
        self.levels() - 1
    }

    #[inline]
    #[must_use]
    pub const fn index_bits(self) -> u32 {
        match self {
            Self::FourLevel => 9,
            Self::TwoLevel => 10,
        }
    }

    #[inline]
    #[must_use]
    pub const fn entry_size(self) -> usize {
        match self {
            Self::FourLevel => 8,
            Self::TwoLevel => 4,
        }
    }

    #[inline]
    #[must_use]
    pub const fn entries_per_table(self) -> usize {
        1 << self.index_bits()
    }

    /// Shift selecting the index bits of `level` (0 = root).
    #[inline]
    #[must_use]
    pub const fn level_shift(self, level: usize) -> u32 {
        debug_assert!(level < self.levels());
        #[allow(clippy::cast_possible_truncation)]
        let below = (self.leaf_level() - level) as u32;
        PAGE_SHIFT + self.index_bits() * below
    }

    /// Entry index of `va` in the table at `level`.
    #[inline]
    #[must_use]
    pub const fn table_index(self, va: VirtualAddress, level: usize) -> TableIndex {
        let mask = (self.entries_per_table() - 1) as u64;
        #[allow(clippy::cast_possible_truncation)]
        let index = ((va.as_u64() >> self.level_shift(level)) & mask) as u16;
        TableIndex(index)
    }

    /// Whether `va` can be translated by this layout.
    ///
    /// Four-level addresses must be canonical (bits 63..47 equal), two-level
    /// addresses must fit into 32 bits.
    #[must_use]
    pub const fn covers_virtual(self, va: VirtualAddress) -> bool {
        match self {
            Self::FourLevel => {
                let top = va.as_u64() >> 47;
                top == 0 || top == (1 << 17) - 1
            }
            Self::TwoLevel => va.as_u64() < 1 << 32,
        }
    }

    /// Whether a page at `pa` can be referenced by an entry of this layout.
    #[must_use]
    pub const fn covers_physical(self, pa: PhysicalAddress) -> bool {
        match self {
            Self::FourLevel => pa.as_u64() < 1 << 52,
            Self::TwoLevel => pa.as_u64() < 1 << 32,
        }
    }

    /// Reads entry `index` from a table frame, widened to 64 bits.
    #[must_use]
    pub fn read_entry(self, table: &PageFrame, index: TableIndex) -> PageTableEntry {
        let offset = index.as_usize() * self.entry_size();
        match self {
            Self::FourLevel => PageTableEntry::from_bits(table.read_u64(offset)),
            Self::TwoLevel => PageTableEntry32::from_bits(table.read_u32(offset)).into(),
        }
    }

    /// Writes entry `index` of a table frame.
    ///
    /// Returns `false` without touching the table if the entry cannot be
    /// encoded by this layout.
    #[must_use]
    pub fn write_entry(self, table: &mut PageFrame, index: TableIndex, entry: PageTableEntry) -> bool {
        let offset = index.as_usize() * self.entry_size();
        match self {
            Self::FourLevel => table.write_u64(offset, entry.into_bits()),
            Self::TwoLevel => match PageTableEntry32::narrow(entry) {
                Some(narrow) => table.write_u32(offset, narrow.into_bits()),
                None => return false,
            },
        }
        true
    }
}

impl fmt::Display for PagingLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FourLevel => f.write_str("4-level"),
            Self::TwoLevel => f.write_str("2-level"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PageFrameNumber;

    #[test]
    fn shifts_match_the_hardware_walk() {
        let four = PagingLayout::FourLevel;
        assert_eq!(
            [0, 1, 2, 3].map(|l| four.level_shift(l)),
            [39, 30, 21, 12]
        );
        let two = PagingLayout::TwoLevel;
        assert_eq!([0, 1].map(|l| two.level_shift(l)), [22, 12]);
    }

    #[test]
    fn every_table_fills_exactly_one_frame() {
        for layout in [PagingLayout::FourLevel, PagingLayout::TwoLevel] {
            assert_eq!(layout.entries_per_table() * layout.entry_size(), 4096);
        }
    }

    #[test]
    fn indices_of_the_higher_half() {
        let va = VirtualAddress::new(0xFFFF_8000_0020_3000);
        let four = PagingLayout::FourLevel;
        assert_eq!(four.table_index(va, 0).as_usize(), 0x100);
        assert_eq!(four.table_index(va, 1).as_usize(), 0);
        assert_eq!(four.table_index(va, 2).as_usize(), 1);
        assert_eq!(four.table_index(va, 3).as_usize(), 3);
    }

    #[test]
    fn two_level_indices_use_ten_bits() {
        let va = VirtualAddress::new(0x8180_3000);
        let two = PagingLayout::TwoLevel;
        assert_eq!(two.table_index(va, 0).as_usize(), 0x206);
        assert_eq!(two.table_index(va, 1).as_usize(), 3);
    }

    #[test]
    fn canonical_form_is_required_for_four_levels() {
        let four = PagingLayout::FourLevel;
        assert!(four.covers_virtual(VirtualAddress::new(0x0000_7FFF_FFFF_F000)));
        assert!(four.covers_virtual(VirtualAddress::new(0xFFFF_8000_0000_0000)));
        assert!(!four.covers_virtual(VirtualAddress::new(0x0000_8000_0000_0000)));
        assert!(!PagingLayout::TwoLevel.covers_virtual(VirtualAddress::new(1 << 32)));
    }

    #[test]
    fn entries_land_at_their_slot() {
        let mut frame = PageFrame::ZEROED;
        let two = PagingLayout::TwoLevel;
        let idx = two.table_index(VirtualAddress::new(0x0040_0000), 0);
        let entry = PageTableEntry::table(PageFrameNumber::new(0x42));
        assert!(two.write_entry(&mut frame, idx, entry));
        assert_eq!(frame.read_u32(4), 0x0004_2003);
        assert_eq!(two.read_entry(&frame, idx), entry);

        let too_high = PageTableEntry::table(PageFrameNumber::new(0x10_0000));
        assert!(!two.write_entry(&mut frame, idx, too_high));
        assert_eq!(two.read_entry(&frame, idx), entry);
    }
}
