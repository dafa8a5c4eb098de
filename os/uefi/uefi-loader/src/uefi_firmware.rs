//! # UEFI Boot Services Backend
//!
//! Everything the loader asks of firmware, implemented on the `uefi` crate:
//!
//! * [`UefiFirmware`]: memory map snapshots and the boot services exit,
//! * [`FirmwareFrameArena`]: page-table frames from `AllocatePages`,
//! * [`register_firmware_memory`]: the firmware memory map as Mapping List
//!   entries,
//! * [`protocol_table`]: the Boot Loader Protocol routines.

use crate::firmware::{ExitFailure, Firmware, MapKey, MemoryMapSnapshot, SnapshotError};
use crate::logger;
use crate::protocol::{BootLoaderProtocol, ProtocolError, ProtocolHandle, VolumeHandle};
use crate::sequencer::{ImageRegion, RootRegister};
use alloc::boxed::Box;
use alloc::vec;
use core::fmt;
use core::ptr::NonNull;
use kernel_info::boot::MemoryMapInfo;
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::{FRAME_BYTES, FrameArena, MapError, MappingList, MemoryUseClass, PageFrame};
use log::{debug, info, warn};
use uefi::boot::{self, AllocateType, MemoryType, SearchType};
use uefi::mem::memory_map::{MemoryMap, MemoryMapOwned};
use uefi::proto::loaded_image::LoadedImage;
use uefi::{Guid, Status};

/// Descriptors of headroom in the snapshot buffer; the map keeps growing
/// while the loader allocates.
const EXTRA_DESCRIPTORS: usize = 64;

/// Firmware class of a UEFI memory type.
#[must_use]
pub fn classify(ty: MemoryType) -> MemoryUseClass {
    match ty {
        MemoryType::CONVENTIONAL => MemoryUseClass::Free,
        MemoryType::BOOT_SERVICES_CODE
        | MemoryType::BOOT_SERVICES_DATA
        | MemoryType::LOADER_CODE
        | MemoryType::LOADER_DATA => MemoryUseClass::FirmwareTemporary,
        MemoryType::RUNTIME_SERVICES_CODE
        | MemoryType::RUNTIME_SERVICES_DATA
        | MemoryType::ACPI_NON_VOLATILE => MemoryUseClass::FirmwarePermanent,
        MemoryType::ACPI_RECLAIM => MemoryUseClass::SpecialMemory,
        MemoryType::UNUSABLE => MemoryUseClass::Bad,
        _ => MemoryUseClass::Reserved,
    }
}

/// Adds every descriptor of `map` to `list`.
///
/// Firmware-temporary ranges are identity mapped so the loader survives the
/// root switch; ranges the kernel keeps using get kernel-space addresses.
///
/// # Errors
/// The first failing [`MappingList`] insertion.
pub fn register_firmware_memory<const N: usize>(
    list: &mut MappingList<N>,
    map: &impl MemoryMap,
) -> Result<usize, MapError> {
    let mut registered = 0;
    for desc in map.entries().filter(|d| d.page_count > 0) {
        let class = classify(desc.ty);
        let pa = PhysicalAddress::new(desc.phys_start);
        match class {
            MemoryUseClass::FirmwareTemporary => {
                list.add(pa, Some(VirtualAddress::new(desc.phys_start)), desc.page_count, class)?;
            }
            MemoryUseClass::FirmwarePermanent | MemoryUseClass::SpecialMemory => {
                let va = list.add_at_cursor(pa, desc.page_count, class)?;
                debug!("{class:?} {pa} ({} pages) at {va}", desc.page_count);
            }
            _ => list.add(pa, None, desc.page_count, class)?,
        }
        registered += 1;
    }
    info!("registered {registered} firmware memory ranges");
    Ok(registered)
}

/// Where the executing loader image lives.
///
/// # Errors
/// The firmware error if the loaded image protocol cannot be opened.
pub fn loaded_image_region() -> uefi::Result<ImageRegion> {
    let image = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())?;
    let (base, size) = image.info();
    Ok(ImageRegion {
        base: PhysicalAddress::from_ptr(base),
        size,
    })
}

/// Memory map snapshots and the boot services exit.
///
/// Keys number the snapshots. The `uefi` crate re-reads the map and retries
/// `ExitBootServices` on its own, so this backend never reports a stale key.
/// The snapshot buffer is allocated up front and never freed, so it outlives
/// boot services.
pub struct UefiFirmware {
    generation: usize,
    buffer: &'static mut [u8],
}

impl UefiFirmware {
    /// Sizes and allocates the snapshot buffer.
    ///
    /// # Errors
    /// [`SnapshotError`] if the memory map cannot be read.
    pub fn new() -> Result<Self, SnapshotError> {
        let sizing = boot::memory_map(MemoryType::LOADER_DATA).map_err(|e| SnapshotError(e.status().0))?;
        let meta = sizing.meta();
        drop(sizing);

        let size = meta.map_size + EXTRA_DESCRIPTORS * meta.desc_size;
        debug!("memory map buffer: {size} bytes");
        Ok(Self {
            generation: 0,
            buffer: Box::leak(vec![0u8; size].into_boxed_slice()),
        })
    }
}

/// Copies the raw descriptors in `bytes` into `buffer`.
///
/// `None` if `buffer` is too small.
fn copy_map(buffer: &mut [u8], bytes: &[u8], desc_size: usize, desc_version: u32) -> Option<MemoryMapInfo> {
    let copy = buffer.get_mut(..bytes.len())?;
    copy.copy_from_slice(bytes);
    Some(describe_map(copy, desc_size, desc_version))
}

fn describe_map(bytes: &[u8], desc_size: usize, desc_version: u32) -> MemoryMapInfo {
    MemoryMapInfo {
        mmap_ptr: bytes.as_ptr() as u64,
        mmap_len: bytes.len() as u64,
        mmap_desc_size: desc_size as u64,
        mmap_desc_version: desc_version,
    }
}

/// The final map after boot services are gone.
///
/// A map that outgrew `buffer` stays where firmware wrote it; that memory is
/// never freed once boot services have exited.
fn settle_exit_map(buffer: &mut [u8], bytes: &'static [u8], desc_size: usize, desc_version: u32) -> MemoryMapInfo {
    copy_map(buffer, bytes, desc_size, desc_version).unwrap_or_else(|| describe_map(bytes, desc_size, desc_version))
}

/// The descriptor bytes of `map`, without the unused tail of its buffer.
fn map_bytes(map: &MemoryMapOwned) -> &[u8] {
    let bytes = map.buffer();
    &bytes[..map.meta().map_size.min(bytes.len())]
}

impl Firmware for UefiFirmware {
    fn memory_map(&mut self) -> Result<MemoryMapSnapshot, SnapshotError> {
        let map = boot::memory_map(MemoryType::LOADER_DATA).map_err(|e| SnapshotError(e.status().0))?;
        let meta = map.meta();
        let info = copy_map(&mut *self.buffer, map_bytes(&map), meta.desc_size, meta.desc_version)
            .ok_or(SnapshotError(Status::BUFFER_TOO_SMALL.0))?;
        self.generation += 1;
        Ok(MemoryMapSnapshot {
            key: MapKey(self.generation),
            map: info,
        })
    }

    unsafe fn exit_boot_services(&mut self, key: MapKey) -> Result<MemoryMapInfo, ExitFailure> {
        info!("exiting boot services (snapshot {})", key.0);
        logger::detach_console();

        // SAFETY: forwarded from the caller. The crate resets the machine if
        // firmware keeps refusing, so there is no failure to report.
        let map = unsafe { boot::exit_boot_services(None) };
        let meta = map.meta();
        let bytes = map_bytes(&map);

        // SAFETY: the map is forgotten below, so its pool buffer is never freed.
        let bytes: &'static [u8] = unsafe { core::slice::from_raw_parts(bytes.as_ptr(), bytes.len()) };
        core::mem::forget(map);

        Ok(settle_exit_map(&mut *self.buffer, bytes, meta.desc_size, meta.desc_version))
    }
}

/// Page-table frames allocated one page at a time from boot services.
///
/// Firmware identity maps all memory, so a frame is reachable at its physical
/// address until the new root is committed.
pub struct FirmwareFrameArena<const N: usize> {
    /// Kept sorted for binary search.
    frames: [PageFrameNumber; N],
    used: usize,
}

impl<const N: usize> FirmwareFrameArena<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            frames: [PageFrameNumber::new(0); N],
            used: 0,
        }
    }

    fn owns(&self, pfn: PageFrameNumber) -> bool {
        self.frames[..self.used].binary_search(&pfn).is_ok()
    }

    fn frame_ptr(pfn: PageFrameNumber) -> Option<*mut PageFrame> {
        let address = usize::try_from(pfn.base_address().as_u64()).ok()?;
        Some(core::ptr::with_exposed_provenance_mut(address))
    }
}

impl<const N: usize> Default for FirmwareFrameArena<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameArena for FirmwareFrameArena<N> {
    fn allocate_frame(&mut self) -> Option<PageFrameNumber> {
        if self.used == N {
            warn!("page-table frame arena exhausted after {N} frames");
            return None;
        }

        let page = boot::allocate_pages(AllocateType::AnyPages, MemoryType::LOADER_DATA, 1).ok()?;
        unsafe {
            core::ptr::write_bytes(page.as_ptr(), 0, FRAME_BYTES);
        }
        let pfn = PhysicalAddress::from_nonnull(page).frame_number();
        let slot = self.frames[..self.used].binary_search(&pfn).unwrap_or_else(|slot| slot);
        self.frames.copy_within(slot..self.used, slot + 1);
        self.frames[slot] = pfn;
        self.used += 1;
        Some(pfn)
    }

    fn frame(&self, pfn: PageFrameNumber) -> Option<&PageFrame> {
        if !self.owns(pfn) {
            return None;
        }
        // SAFETY: allocated above, identity mapped, page aligned.
        Self::frame_ptr(pfn).map(|p| unsafe { &*p })
    }

    fn frame_mut(&mut self, pfn: PageFrameNumber) -> Option<&mut PageFrame> {
        if !self.owns(pfn) {
            return None;
        }
        // SAFETY: as above; `&mut self` makes the borrow unique.
        Self::frame_ptr(pfn).map(|p| unsafe { &mut *p })
    }
}

/// CR3 as the page-table base register.
pub struct Cr3Register;

impl RootRegister for Cr3Register {
    unsafe fn commit(&mut self, root: PhysicalAddress) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            use kernel_registers::StoreRegisterUnsafe;
            use kernel_registers::cr3::Cr3;
            Cr3::from_root(root.frame_number()).store_unsafe();
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        let _ = root;
    }
}

/// The Boot Loader Protocol routines backed by boot services.
#[must_use]
pub fn protocol_table() -> BootLoaderProtocol {
    BootLoaderProtocol {
        debug_print,
        console_print,
        open_volume,
        close_volume,
        open_protocol,
        close_protocol,
    }
}

fn debug_print(args: fmt::Arguments) {
    kernel_qemu::debug_print(args);
}

fn console_print(args: fmt::Arguments) {
    uefi::print!("{args}");
}

/// The device the loader was started from, if it carries a file system.
fn open_volume() -> Result<VolumeHandle, ProtocolError> {
    let device = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())
        .map_err(|_| ProtocolError::Unavailable)?
        .device()
        .ok_or(ProtocolError::Unavailable)?;
    boot::get_image_file_system(boot::image_handle()).map_err(|_| ProtocolError::Unavailable)?;
    NonNull::new(device.as_ptr()).map(VolumeHandle).ok_or(ProtocolError::Unavailable)
}

fn close_volume(_: VolumeHandle) -> Result<(), ProtocolError> {
    Ok(())
}

/// The first handle that supports `guid`.
fn open_protocol(guid: &Guid) -> Result<ProtocolHandle, ProtocolError> {
    let handles = boot::locate_handle_buffer(SearchType::ByProtocol(guid)).map_err(|_| ProtocolError::Unavailable)?;
    let handle = handles.first().ok_or(ProtocolError::Unavailable)?;
    NonNull::new(handle.as_ptr()).map(ProtocolHandle).ok_or(ProtocolError::Unavailable)
}

/// Located handles hold no open reference.
fn close_protocol(_: ProtocolHandle, _: &Guid) -> Result<(), ProtocolError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_types_map_onto_use_classes() {
        let cases = [
            (MemoryType::CONVENTIONAL, MemoryUseClass::Free),
            (MemoryType::BOOT_SERVICES_DATA, MemoryUseClass::FirmwareTemporary),
            (MemoryType::LOADER_CODE, MemoryUseClass::FirmwareTemporary),
            (MemoryType::RUNTIME_SERVICES_CODE, MemoryUseClass::FirmwarePermanent),
            (MemoryType::ACPI_NON_VOLATILE, MemoryUseClass::FirmwarePermanent),
            (MemoryType::ACPI_RECLAIM, MemoryUseClass::SpecialMemory),
            (MemoryType::UNUSABLE, MemoryUseClass::Bad),
            (MemoryType::MMIO, MemoryUseClass::Reserved),
            (MemoryType::RESERVED, MemoryUseClass::Reserved),
        ];
        for (ty, class) in cases {
            assert_eq!(classify(ty), class, "{ty:?}");
        }
    }

    #[test]
    fn exit_map_is_copied_into_the_snapshot_buffer() {
        let descriptors: &'static [u8] = Box::leak(vec![0x5A; 96].into_boxed_slice());
        let mut buffer = vec![0u8; 128];
        let info = settle_exit_map(&mut buffer, descriptors, 48, 1);
        assert_eq!(info.mmap_ptr, buffer.as_ptr() as u64);
        assert_eq!((info.mmap_len, info.mmap_desc_size, info.mmap_desc_version), (96, 48, 1));
        assert_eq!(info.descriptor_count(), 2);
        assert!(buffer[..96].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn exit_map_larger_than_the_buffer_stays_in_place() {
        let descriptors: &'static [u8] = Box::leak(vec![0x5A; 192].into_boxed_slice());
        let mut buffer = vec![0u8; 96];
        let info = settle_exit_map(&mut buffer, descriptors, 48, 1);
        assert_eq!(info.mmap_ptr, descriptors.as_ptr() as u64);
        assert_eq!(info.mmap_len, 192);
        assert_eq!(info.descriptor_count(), 4);
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn snapshot_copy_refuses_a_short_buffer() {
        let mut buffer = [0u8; 16];
        assert_eq!(copy_map(&mut buffer, &[1; 48], 48, 1), None);
    }

    #[test]
    fn arena_rejects_frames_it_did_not_allocate() {
        let arena = FirmwareFrameArena::<4>::new();
        assert!(arena.frame(PageFrameNumber::new(0x100)).is_none());
    }
}
