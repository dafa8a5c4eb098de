//! # Boot-Time Page Table Construction
//!
//! Everything needed to assemble the kernel's first address space while the
//! firmware still owns the machine:
//!
//! * [`MappingList`]: the ranges that must be mapped, plus a cursor handing
//!   out virtual pages for page-table frames.
//! * [`AddressSpaceBuilder`]: walks and extends the table hierarchy, and
//!   registers every table it creates back into the list.
//! * [`FrameArena`]: where table frames come from. [`StaticArena`] is a fixed
//!   in-memory pool; the loader provides a firmware-backed one.
//! * [`PagingLayout`]: 4-level (x86-64) or 2-level (i686) geometry.
//!
//! ## Virtual address decomposition (4-level)
//!
//! ```text
//!  63        48 47    39 38    30 29    21 20    12 11         0
//! ┌────────────┬────────┬────────┬────────┬────────┬────────────┐
//! │ sign-ext   │ L0 idx │ L1 idx │ L2 idx │ L3 idx │  offset    │
//! └────────────┴────────┴────────┴────────┴────────┴────────────┘
//! ```
//!
//! With the 2-level layout the address is split 10/10/12 instead.
//!
//! ## Example
//!
//! ```rust
//! use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress, VirtualAddress};
//! use kernel_vmem::{AddressSpaceBuilder, MappingList, PagingLayout, StaticArena};
//!
//! let mut arena = Box::new(StaticArena::<8>::new(PageFrameNumber::new(0x800)));
//! let mut list = MappingList::<16>::new(VirtualAddress::new(0xFFFF_F800_0180_0000));
//! let mut aspace = AddressSpaceBuilder::allocate(&mut *arena, PagingLayout::FourLevel)?;
//!
//! let va = VirtualAddress::new(0x10_0000);
//! aspace.build_mapping(&mut list, va, PhysicalAddress::new(0x10_0000), 1)?;
//! aspace.map_outstanding(&mut list)?;
//! assert_eq!(aspace.translate(va), Some(PhysicalAddress::new(0x10_0000)));
//! # Ok::<(), kernel_vmem::MapError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod address_space;
mod error;
mod frame;
mod mapping;
mod page_table_entry;
mod paging_layout;

pub use address_space::AddressSpaceBuilder;
pub use error::MapError;
pub use frame::{FRAME_BYTES, FrameArena, PageFrame, StaticArena};
pub use mapping::{MappingEntry, MappingList, MemoryUseClass};
pub use page_table_entry::{PageTableEntry, PageTableEntry32};
pub use paging_layout::{PagingLayout, TableIndex};
