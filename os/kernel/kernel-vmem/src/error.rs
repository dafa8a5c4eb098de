use crate::PagingLayout;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress, VirtualAddress};

/// Reasons a mapping request fails.
///
/// Table frames allocated before the failure stay linked into the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("no frame left for a page table")]
    AllocationFailure,
    #[error("mapping list is full")]
    MappingListFull,
    #[error("a mapping must cover at least one page")]
    EmptyRequest,
    #[error("virtual address {0} is not page aligned")]
    MisalignedVirtual(VirtualAddress),
    #[error("physical address {0} is not page aligned")]
    MisalignedPhysical(PhysicalAddress),
    #[error("virtual address {0} is not reachable with {1} paging")]
    VirtualOutOfRange(VirtualAddress, PagingLayout),
    #[error("physical address {0} is not reachable with {1} paging")]
    PhysicalOutOfRange(PhysicalAddress, PagingLayout),
    #[error("frame {0} is not part of the page-table arena")]
    UnknownFrame(PageFrameNumber),
    #[error("address range wraps around")]
    AddressOverflow,
}

impl MapError {
    /// Running out of frames or list slots, as opposed to a malformed request.
    #[must_use]
    pub const fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::AllocationFailure | Self::MappingListFull)
    }
}
