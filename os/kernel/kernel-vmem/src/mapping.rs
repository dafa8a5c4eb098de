//! # Mapping List
//!
//! The ordered, fixed-capacity record of every range the new address space
//! must contain. Collaborators append to it; the page table builder appends
//! the frames of the tables it creates, so walking the list to its end also
//! maps the tables themselves.

use crate::MapError;
use kernel_memory_addresses::{PAGE_SIZE, PageFrameNumber, PhysicalAddress, VirtualAddress};

/// What a physical range is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryUseClass {
    Free,
    Bad,
    LoadedProgram,
    /// Owned by firmware or the loader until firmware services are exited.
    FirmwareTemporary,
    /// Must stay intact for firmware runtime services.
    FirmwarePermanent,
    LoaderHeap,
    LoaderStack,
    SystemCode,
    BootDriver,
    StartupDpcStack,
    /// Boot-time data, including page-table frames.
    MemoryData,
    /// Firmware tables the kernel may reclaim after parsing them.
    SpecialMemory,
    #[default]
    Reserved,
}

/// One physical range and where (if anywhere) it appears virtually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    pub physical_address: PhysicalAddress,
    /// `None` keeps the range out of the page tables.
    pub virtual_address: Option<VirtualAddress>,
    pub page_count: u64,
    pub class: MemoryUseClass,
}

impl MappingEntry {
    pub const EMPTY: Self = Self {
        physical_address: PhysicalAddress::ZERO,
        virtual_address: None,
        page_count: 0,
        class: MemoryUseClass::Reserved,
    };

    /// Size of the range in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> u64 {
        self.page_count * PAGE_SIZE
    }
}

/// Fixed-capacity Mapping List with a cursor for handing out virtual pages.
pub struct MappingList<const N: usize> {
    entries: [MappingEntry; N],
    len: usize,
    /// Entries before this index have been drained into the page tables.
    drained: usize,
    next_virtual: VirtualAddress,
}

impl<const N: usize> MappingList<N> {
    /// An empty list whose virtual cursor starts at `first_free_virtual`.
    #[must_use]
    pub const fn new(first_free_virtual: VirtualAddress) -> Self {
        Self {
            entries: [MappingEntry::EMPTY; N],
            len: 0,
            drained: 0,
            next_virtual: first_free_virtual,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<MappingEntry> {
        self.as_slice().get(index).copied()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[MappingEntry] {
        &self.entries[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> + '_ {
        self.as_slice().iter()
    }

    /// The next virtual address the cursor would hand out.
    #[inline]
    #[must_use]
    pub const fn next_free_virtual(&self) -> VirtualAddress {
        self.next_virtual
    }

    /// Appends a range.
    ///
    /// # Errors
    /// * [`MapError::EmptyRequest`] for zero pages.
    /// * [`MapError::MisalignedPhysical`] / [`MapError::MisalignedVirtual`].
    /// * [`MapError::MappingListFull`] when the list is at capacity.
    pub fn add(
        &mut self,
        physical_address: PhysicalAddress,
        virtual_address: Option<VirtualAddress>,
        page_count: u64,
        class: MemoryUseClass,
    ) -> Result<(), MapError> {
        if page_count == 0 {
            return Err(MapError::EmptyRequest);
        }
        if !physical_address.is_page_aligned() {
            return Err(MapError::MisalignedPhysical(physical_address));
        }
        if let Some(va) = virtual_address
            && !va.is_page_aligned()
        {
            return Err(MapError::MisalignedVirtual(va));
        }
        if self.len == N {
            return Err(MapError::MappingListFull);
        }

        self.entries[self.len] = MappingEntry {
            physical_address,
            virtual_address,
            page_count,
            class,
        };
        self.len += 1;
        Ok(())
    }

    /// Reserves `pages` pages at the virtual cursor and advances it.
    ///
    /// # Errors
    /// [`MapError::AddressOverflow`] if the cursor would wrap.
    pub fn allocate_virtual(&mut self, pages: u64) -> Result<VirtualAddress, MapError> {
        let va = self.next_virtual;
        let bytes = pages.checked_mul(PAGE_SIZE).ok_or(MapError::AddressOverflow)?;
        self.next_virtual = va.checked_add(bytes).ok_or(MapError::AddressOverflow)?;
        Ok(va)
    }

    /// Appends a range at the next free virtual pages.
    ///
    /// # Errors
    /// As [`MappingList::add`]; the cursor does not move on failure.
    pub fn add_at_cursor(
        &mut self,
        physical_address: PhysicalAddress,
        page_count: u64,
        class: MemoryUseClass,
    ) -> Result<VirtualAddress, MapError> {
        if self.len == N {
            return Err(MapError::MappingListFull);
        }

        let saved = self.next_virtual;
        let va = self.allocate_virtual(page_count)?;
        if let Err(e) = self.add(physical_address, Some(va), page_count, class) {
            self.next_virtual = saved;
            return Err(e);
        }
        Ok(va)
    }

    /// Records a freshly allocated page-table frame so that it gets mapped.
    ///
    /// # Errors
    /// As [`MappingList::add_at_cursor`].
    pub fn register_table_frame(&mut self, frame: PageFrameNumber) -> Result<VirtualAddress, MapError> {
        self.add_at_cursor(frame.base_address(), 1, MemoryUseClass::MemoryData)
    }

    /// Hands out the next entry not yet drained into the page tables.
    ///
    /// Entries appended while draining are returned by later calls.
    pub(crate) fn next_outstanding(&mut self) -> Option<MappingEntry> {
        let entry = self.get(self.drained)?;
        self.drained += 1;
        Some(entry)
    }

    /// Number of entries still waiting to be drained.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.len - self.drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: VirtualAddress = VirtualAddress::new(0xFFFF_F800_0180_0000);

    #[test]
    fn cursor_advances_per_registered_table() {
        let mut list = MappingList::<4>::new(BASE);
        let a = list.register_table_frame(PageFrameNumber::new(0x10)).unwrap();
        let b = list.register_table_frame(PageFrameNumber::new(0x11)).unwrap();
        assert_eq!(a, BASE);
        assert_eq!(b, BASE + PAGE_SIZE);
        assert_eq!(list.next_free_virtual(), BASE + 2 * PAGE_SIZE);

        let e = list.get(1).unwrap();
        assert_eq!(e.physical_address, PhysicalAddress::new(0x11000));
        assert_eq!(e.class, MemoryUseClass::MemoryData);
        assert_eq!(e.page_count, 1);
    }

    #[test]
    fn full_list_reports_and_keeps_the_cursor() {
        let mut list = MappingList::<1>::new(BASE);
        list.add(PhysicalAddress::ZERO, None, 1, MemoryUseClass::Free).unwrap();
        assert_eq!(
            list.register_table_frame(PageFrameNumber::new(1)),
            Err(MapError::MappingListFull)
        );
        assert_eq!(list.next_free_virtual(), BASE);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        let mut list = MappingList::<4>::new(BASE);
        assert_eq!(
            list.add(PhysicalAddress::new(0x1000), None, 0, MemoryUseClass::Free),
            Err(MapError::EmptyRequest)
        );
        assert_eq!(
            list.add(PhysicalAddress::new(0x1001), None, 1, MemoryUseClass::Free),
            Err(MapError::MisalignedPhysical(PhysicalAddress::new(0x1001)))
        );
        let va = VirtualAddress::new(0x2010);
        assert_eq!(
            list.add(PhysicalAddress::new(0x1000), Some(va), 1, MemoryUseClass::Free),
            Err(MapError::MisalignedVirtual(va))
        );
        assert!(list.is_empty());
    }

    #[test]
    fn outstanding_entries_include_late_additions() {
        let mut list = MappingList::<4>::new(BASE);
        list.add(PhysicalAddress::new(0x1000), None, 1, MemoryUseClass::Free).unwrap();
        assert!(list.next_outstanding().is_some());
        assert!(list.next_outstanding().is_none());

        list.register_table_frame(PageFrameNumber::new(7)).unwrap();
        assert_eq!(list.outstanding(), 1);
        assert_eq!(
            list.next_outstanding().map(|e| e.physical_address),
            Some(PhysicalAddress::new(0x7000))
        );
        assert_eq!(list.outstanding(), 0);
    }

    #[test]
    fn cursor_overflow_is_an_error() {
        let mut list = MappingList::<2>::new(VirtualAddress::new(u64::MAX - 0xFFF));
        assert_eq!(list.allocate_virtual(1), Err(MapError::AddressOverflow));
    }
}
