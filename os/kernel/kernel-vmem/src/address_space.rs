//! # Page Table Builder
//!
//! Grows a radix tree of page tables inside a [`FrameArena`] one 4 KiB page at
//! a time.
//!
//! ```text
//!   root (level 0) ──► level 1 ──► … ──► leaf level ──► 4 KiB page
//!        ▲                 ▲                  ▲
//!        └─ allocated up front, the rest on first use and registered
//!           in the Mapping List so the tables map themselves
//! ```
//!
//! Every table created while serving a request is appended to the
//! [`MappingList`]. [`AddressSpaceBuilder::map_outstanding`] keeps draining the
//! list until no entry is left, which maps those table frames, which may in
//! turn create more tables, and so on until the hierarchy is closed.

use crate::{FrameArena, MapError, MappingList, PageFrame, PageTableEntry, PagingLayout};
use kernel_memory_addresses::{PAGE_SIZE, PageFrameNumber, PhysicalAddress, VirtualAddress};
use log::{debug, trace};

/// Builds one address space rooted at a single top-level table.
pub struct AddressSpaceBuilder<'a, A: FrameArena> {
    arena: &'a mut A,
    layout: PagingLayout,
    root: PageFrameNumber,
}

impl<'a, A: FrameArena> AddressSpaceBuilder<'a, A> {
    /// Allocates a zeroed root table from `arena`.
    ///
    /// The root is not registered anywhere; callers decide whether and where
    /// it becomes visible.
    ///
    /// # Errors
    /// [`MapError::AllocationFailure`] if the arena is empty.
    pub fn allocate(arena: &'a mut A, layout: PagingLayout) -> Result<Self, MapError> {
        let root = arena.allocate_frame().ok_or(MapError::AllocationFailure)?;
        debug!("{layout} root table at {}", root.base_address());
        Ok(Self { arena, layout, root })
    }

    /// Continues building on an existing root.
    ///
    /// # Errors
    /// [`MapError::UnknownFrame`] if `root` does not belong to `arena`.
    pub fn with_root(arena: &'a mut A, layout: PagingLayout, root: PageFrameNumber) -> Result<Self, MapError> {
        if arena.frame(root).is_none() {
            return Err(MapError::UnknownFrame(root));
        }
        Ok(Self { arena, layout, root })
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PageFrameNumber {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> PagingLayout {
        self.layout
    }

    /// Maps `pages` consecutive 4 KiB pages of `phys` at `virt`.
    ///
    /// Missing intermediate tables are allocated, zeroed, linked as valid and
    /// writable, and registered in `list`. Existing leaf entries are
    /// overwritten.
    ///
    /// # Errors
    /// * Malformed requests ([`MapError::EmptyRequest`], misalignment, ranges
    ///   the layout cannot express, wrap-around) fail before any change.
    /// * [`MapError::AllocationFailure`] / [`MapError::MappingListFull`] abort
    ///   mid-way; tables linked so far stay in place.
    pub fn build_mapping<const N: usize>(
        &mut self,
        list: &mut MappingList<N>,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        pages: u64,
    ) -> Result<(), MapError> {
        self.validate(virt, phys, pages)?;
        trace!("map {virt} -> {phys} ({pages} pages)");

        let mut va = virt;
        let mut pa = phys;
        for page in 0..pages {
            let leaf = self.walk_or_create(list, va)?;
            let index = self.layout.table_index(va, self.layout.leaf_level());
            self.write(leaf, index, PageTableEntry::page(pa.frame_number()), pa)?;

            // validate() proved the last page fits; the step past it may not.
            if page + 1 < pages {
                va += PAGE_SIZE;
                pa += PAGE_SIZE;
            }
        }
        Ok(())
    }

    /// Maps every not-yet-drained list entry that carries a virtual address.
    ///
    /// Entries appended during the drain (new table frames) are picked up in
    /// the same call. Returns the number of entries mapped.
    ///
    /// # Errors
    /// The first failing [`AddressSpaceBuilder::build_mapping`].
    pub fn map_outstanding<const N: usize>(&mut self, list: &mut MappingList<N>) -> Result<usize, MapError> {
        let mut mapped = 0;
        while let Some(entry) = list.next_outstanding() {
            let Some(va) = entry.virtual_address else {
                continue;
            };
            self.build_mapping(list, va, entry.physical_address, entry.page_count)?;
            mapped += 1;
        }
        debug!("drained {mapped} mappings, {} entries total", list.len());
        Ok(mapped)
    }

    /// Resolves `va` through the tables without allocating anything.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let leaf = self.leaf_entry(va)?;
        leaf.valid().then(|| leaf.physical_address() + va.page_offset())
    }

    /// The leaf entry for `va`, or `None` if an intermediate table is missing.
    #[must_use]
    pub fn leaf_entry(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        if !self.layout.covers_virtual(va) {
            return None;
        }

        let mut table = self.root;
        for level in 0..self.layout.leaf_level() {
            let entry = self.layout.read_entry(self.table(table).ok()?, self.layout.table_index(va, level));
            if !entry.valid() {
                return None;
            }
            table = entry.frame();
        }

        let index = self.layout.table_index(va, self.layout.leaf_level());
        Some(self.layout.read_entry(self.table(table).ok()?, index))
    }

    fn validate(&self, virt: VirtualAddress, phys: PhysicalAddress, pages: u64) -> Result<(), MapError> {
        if pages == 0 {
            return Err(MapError::EmptyRequest);
        }
        if !virt.is_page_aligned() {
            return Err(MapError::MisalignedVirtual(virt));
        }
        if !phys.is_page_aligned() {
            return Err(MapError::MisalignedPhysical(phys));
        }

        let span = (pages - 1).checked_mul(PAGE_SIZE).ok_or(MapError::AddressOverflow)?;
        let last_va = virt.checked_add(span).ok_or(MapError::AddressOverflow)?;
        let last_pa = phys.checked_add(span).ok_or(MapError::AddressOverflow)?;

        for va in [virt, last_va] {
            if !self.layout.covers_virtual(va) {
                return Err(MapError::VirtualOutOfRange(va, self.layout));
            }
        }
        // Four-level ranges must not straddle the canonical hole.
        if self.layout == PagingLayout::FourLevel && (virt.as_u64() >> 47) != (last_va.as_u64() >> 47) {
            return Err(MapError::VirtualOutOfRange(last_va, self.layout));
        }
        if !self.layout.covers_physical(last_pa) {
            return Err(MapError::PhysicalOutOfRange(last_pa, self.layout));
        }
        Ok(())
    }

    /// Descends from the root to the leaf table of `va`, creating tables.
    fn walk_or_create<const N: usize>(
        &mut self,
        list: &mut MappingList<N>,
        va: VirtualAddress,
    ) -> Result<PageFrameNumber, MapError> {
        let mut table = self.root;
        for level in 0..self.layout.leaf_level() {
            let index = self.layout.table_index(va, level);
            let entry = self.layout.read_entry(self.table(table)?, index);
            table = if entry.valid() {
                entry.frame()
            } else {
                let next = self.arena.allocate_frame().ok_or(MapError::AllocationFailure)?;
                let next_va = list.register_table_frame(next)?;
                trace!("level {} table at {} (mapped at {next_va})", level + 1, next.base_address());
                self.write(table, index, PageTableEntry::table(next), next.base_address())?;
                next
            };
        }
        Ok(table)
    }

    fn write(
        &mut self,
        table: PageFrameNumber,
        index: crate::TableIndex,
        entry: PageTableEntry,
        target: PhysicalAddress,
    ) -> Result<(), MapError> {
        let layout = self.layout;
        if layout.write_entry(self.table_mut(table)?, index, entry) {
            Ok(())
        } else {
            Err(MapError::PhysicalOutOfRange(target, layout))
        }
    }

    fn table(&self, pfn: PageFrameNumber) -> Result<&PageFrame, MapError> {
        self.arena.frame(pfn).ok_or(MapError::UnknownFrame(pfn))
    }

    fn table_mut(&mut self, pfn: PageFrameNumber) -> Result<&mut PageFrame, MapError> {
        self.arena.frame_mut(pfn).ok_or(MapError::UnknownFrame(pfn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryUseClass, StaticArena};

    /// Table frames are placed at 16 MiB so they never collide with the
    /// physical addresses used by the tests.
    const ARENA_BASE: PageFrameNumber = PageFrameNumber::new(0x1000);
    const CURSOR: VirtualAddress = VirtualAddress::new(0xFFFF_F800_0180_0000);

    fn arena<const N: usize>() -> Box<StaticArena<N>> {
        Box::new(StaticArena::new(ARENA_BASE))
    }

    #[test]
    fn identity_mapping_of_one_mib_creates_three_tables() {
        let mut arena = arena::<16>();
        let mut list = MappingList::<32>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        let one_mib = VirtualAddress::new(0x10_0000);
        aspace
            .build_mapping(&mut list, one_mib, PhysicalAddress::new(0x10_0000), 1)
            .unwrap();

        assert_eq!(aspace.translate(one_mib), Some(PhysicalAddress::new(0x10_0000)));
        assert_eq!(
            aspace.translate(one_mib + 0x123),
            Some(PhysicalAddress::new(0x10_0123))
        );
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|e| e.class == MemoryUseClass::MemoryData));
        assert_eq!(arena.used(), 4);
    }

    #[test]
    fn consecutive_higher_half_pages_share_their_tables() {
        let mut arena = arena::<16>();
        let mut list = MappingList::<32>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        let va = VirtualAddress::new(0xFFFF_8000_0000_0000);
        let pa = PhysicalAddress::new(0x20_0000);
        aspace.build_mapping(&mut list, va, pa, 4).unwrap();

        for i in 0..4 {
            assert_eq!(aspace.translate(va + i * PAGE_SIZE), Some(pa + i * PAGE_SIZE));
        }
        assert_eq!(aspace.translate(va + 4 * PAGE_SIZE), None);
        assert_eq!(list.len(), 3);

        let leaf = aspace.leaf_entry(va).unwrap();
        assert!(leaf.valid() && leaf.write());
        assert!(!leaf.owner() && !leaf.no_execute());
    }

    #[test]
    fn zero_page_is_an_ordinary_mapping() {
        let mut arena = arena::<8>();
        let mut list = MappingList::<8>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        aspace
            .build_mapping(&mut list, VirtualAddress::ZERO, PhysicalAddress::ZERO, 1)
            .unwrap();
        assert_eq!(aspace.translate(VirtualAddress::ZERO), Some(PhysicalAddress::ZERO));
    }

    #[test]
    fn drained_address_space_maps_every_table_frame() {
        let mut arena = arena::<32>();
        let mut list = MappingList::<64>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();
        let root = aspace.root();
        list.register_table_frame(root).unwrap();
        list.add(
            PhysicalAddress::new(0x10_0000),
            Some(VirtualAddress::new(0x10_0000)),
            2,
            MemoryUseClass::FirmwareTemporary,
        )
        .unwrap();
        list.add(PhysicalAddress::new(0x80_0000), None, 16, MemoryUseClass::Free)
            .unwrap();

        aspace.map_outstanding(&mut list).unwrap();
        assert_eq!(list.outstanding(), 0);

        let frames: Vec<_> = arena.allocated().collect();
        assert!(frames.len() > 1);
        for frame in frames {
            let entry = list
                .iter()
                .find(|e| e.physical_address == frame.base_address())
                .expect("every table frame is registered");
            let va = entry.virtual_address.expect("table frames are mapped");
            let aspace = AddressSpaceBuilder::with_root(&mut *arena, PagingLayout::FourLevel, root).unwrap();
            assert_eq!(aspace.translate(va), Some(frame.base_address()));
        }
    }

    #[test]
    fn unmapped_entries_are_skipped_by_the_drain() {
        let mut arena = arena::<8>();
        let mut list = MappingList::<8>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();
        list.add(PhysicalAddress::new(0x9000), None, 1, MemoryUseClass::Bad).unwrap();

        assert_eq!(aspace.map_outstanding(&mut list).unwrap(), 0);
        assert_eq!(aspace.translate(VirtualAddress::new(0x9000)), None);
    }

    #[test]
    fn two_level_layout_uses_ten_bit_indices() {
        let mut arena = arena::<8>();
        let mut list = MappingList::<8>::new(VirtualAddress::new(0x8180_0000));
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::TwoLevel).unwrap();

        let va = VirtualAddress::new(0x8000_0000);
        aspace
            .build_mapping(&mut list, va, PhysicalAddress::new(0x0030_0000), 2)
            .unwrap();
        assert_eq!(aspace.translate(va + PAGE_SIZE), Some(PhysicalAddress::new(0x0030_1000)));
        assert_eq!(list.len(), 1);

        let far = PhysicalAddress::new(1 << 32);
        assert_eq!(
            aspace.build_mapping(&mut list, va, far, 1),
            Err(MapError::PhysicalOutOfRange(far, PagingLayout::TwoLevel))
        );
        let high = VirtualAddress::new(1 << 32);
        assert_eq!(
            aspace.build_mapping(&mut list, high, PhysicalAddress::ZERO, 1),
            Err(MapError::VirtualOutOfRange(high, PagingLayout::TwoLevel))
        );
    }

    #[test]
    fn running_out_of_frames_keeps_partial_tables() {
        let mut arena = arena::<2>();
        let mut list = MappingList::<8>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        let err = aspace
            .build_mapping(&mut list, VirtualAddress::new(0x4000_0000), PhysicalAddress::ZERO, 1)
            .unwrap_err();
        assert_eq!(err, MapError::AllocationFailure);
        assert!(err.is_resource_exhaustion());
        // The level-1 table made it in before the arena ran dry.
        assert_eq!(list.len(), 1);
        assert!(aspace.leaf_entry(VirtualAddress::new(0x4000_0000)).is_none());
    }

    #[test]
    fn a_full_list_aborts_table_creation() {
        let mut arena = arena::<8>();
        let mut list = MappingList::<1>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        assert_eq!(
            aspace.build_mapping(&mut list, VirtualAddress::ZERO, PhysicalAddress::ZERO, 1),
            Err(MapError::MappingListFull)
        );
    }

    #[test]
    fn malformed_requests_change_nothing() {
        let mut arena = arena::<8>();
        let mut list = MappingList::<8>::new(CURSOR);
        let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel).unwrap();

        let cases = [
            (VirtualAddress::new(0x1000), PhysicalAddress::new(0x1000), 0, MapError::EmptyRequest),
            (
                VirtualAddress::new(0x1001),
                PhysicalAddress::new(0x1000),
                1,
                MapError::MisalignedVirtual(VirtualAddress::new(0x1001)),
            ),
            (
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x1800),
                1,
                MapError::MisalignedPhysical(PhysicalAddress::new(0x1800)),
            ),
            (
                VirtualAddress::new(0x0000_8000_0000_0000),
                PhysicalAddress::ZERO,
                1,
                MapError::VirtualOutOfRange(VirtualAddress::new(0x0000_8000_0000_0000), PagingLayout::FourLevel),
            ),
            (
                VirtualAddress::new(0xFFFF_FFFF_FFFF_F000),
                PhysicalAddress::ZERO,
                2,
                MapError::AddressOverflow,
            ),
        ];
        for (va, pa, pages, expected) in cases {
            assert_eq!(aspace.build_mapping(&mut list, va, pa, pages), Err(expected));
        }
        assert!(list.is_empty());
        assert_eq!(arena.used(), 1);
    }

    #[test]
    fn with_root_rejects_foreign_frames() {
        let mut arena = arena::<2>();
        assert!(matches!(
            AddressSpaceBuilder::with_root(&mut *arena, PagingLayout::FourLevel, PageFrameNumber::new(1)),
            Err(MapError::UnknownFrame(_))
        ));
    }
}
