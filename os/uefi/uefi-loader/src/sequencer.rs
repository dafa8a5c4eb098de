//! # Firmware Exit Sequencer
//!
//! Turns a filled [`MappingList`] into the live address space. The steps run
//! in a fixed order and none is skipped:
//!
//! ```text
//! AllocatingRoot ─► MappingSelf ─► MappingImage ─► MappingAllOutstanding
//!        ─► MappingZeroPage ─► SnapshottingFirmwareMemoryMap ─► ExitingFirmwareServices
//!                                        ▲                              │
//!                                        └──────── stale map key ───────┤
//!                                                                       ▼
//!                                            CommittingRootRegister ─► Done
//! ```
//!
//! Writing the root register is the very last action. If firmware refuses to
//! exit, the register is left alone.

use crate::firmware::{ExitFailure, Firmware, SnapshotError};
use core::fmt;
use kernel_info::boot::{KernelBootInfo, MemoryMapInfo};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, align_down, size_to_pages};
use kernel_vmem::{AddressSpaceBuilder, FrameArena, MapError, MappingList, MemoryUseClass, PagingLayout};
use log::{debug, error, info, warn};

/// Where the sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Idle,
    AllocatingRoot,
    MappingSelf,
    MappingImage,
    MappingAllOutstanding,
    MappingZeroPage,
    SnapshottingFirmwareMemoryMap,
    ExitingFirmwareServices,
    CommittingRootRegister,
    Done,
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AllocatingRoot => "allocating root table",
            Self::MappingSelf => "mapping root table",
            Self::MappingImage => "mapping loader image",
            Self::MappingAllOutstanding => "mapping outstanding entries",
            Self::MappingZeroPage => "mapping zero page",
            Self::SnapshottingFirmwareMemoryMap => "snapshotting firmware memory map",
            Self::ExitingFirmwareServices => "exiting firmware services",
            Self::CommittingRootRegister => "committing root register",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Runtime knobs of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerConfig {
    /// How often exiting boot services is tried when the map key goes stale.
    pub exit_attempts: u32,
    /// Whether virtual page 0 maps physical page 0.
    pub map_zero_page: bool,
    pub layout: PagingLayout,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            exit_attempts: 3,
            map_zero_page: true,
            layout: PagingLayout::native(),
        }
    }
}

/// The executing loader image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub base: PhysicalAddress,
    pub size: u64,
}

impl ImageRegion {
    /// Page-aligned base and page count covering the image.
    ///
    /// # Errors
    /// [`MapError::AddressOverflow`] if the image wraps the address space.
    pub fn pages(&self) -> Result<(PhysicalAddress, u64), MapError> {
        let start = align_down(self.base.as_u64(), PAGE_SIZE);
        let end = self.base.as_u64().checked_add(self.size).ok_or(MapError::AddressOverflow)?;
        Ok((PhysicalAddress::new(start), size_to_pages(end - start)))
    }
}

/// The register that selects the active page tables.
pub trait RootRegister {
    /// Activates the hierarchy rooted at `root`.
    ///
    /// # Safety
    /// `root` must be a complete table hierarchy that maps the code and stack
    /// currently executing.
    unsafe fn commit(&mut self, root: PhysicalAddress);
}

/// The address space that is now live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedAddressSpace {
    pub root: PhysicalAddress,
    /// The memory map as it stood after boot services were exited.
    pub memory_map: MemoryMapInfo,
    /// Exit attempts it took, including the successful one.
    pub exit_attempts: u32,
}

impl CommittedAddressSpace {
    /// The record handed to the kernel.
    #[must_use]
    pub fn boot_info(&self) -> KernelBootInfo {
        KernelBootInfo {
            mmap: self.memory_map.clone(),
            root_table: self.root.as_u64(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("firmware refused to exit boot services after {attempts} attempt(s): {last}")]
    FirmwareExitRejected { attempts: u32, last: ExitFailure },
}

/// Drives one address space from Mapping List to root register.
pub struct ExitSequencer<'a, F, A, R> {
    firmware: &'a mut F,
    arena: &'a mut A,
    root_register: &'a mut R,
    config: SequencerConfig,
    state: ExitState,
}

impl<'a, F, A, R> ExitSequencer<'a, F, A, R>
where
    F: Firmware,
    A: FrameArena,
    R: RootRegister,
{
    pub const fn new(
        firmware: &'a mut F,
        arena: &'a mut A,
        root_register: &'a mut R,
        config: SequencerConfig,
    ) -> Self {
        Self {
            firmware,
            arena,
            root_register,
            config,
            state: ExitState::Idle,
        }
    }

    /// The last state entered; after a failure, the step that failed.
    #[must_use]
    pub const fn state(&self) -> ExitState {
        self.state
    }

    /// Builds the tables for `list`, exits boot services and switches to the
    /// new root.
    ///
    /// # Errors
    /// * [`CommitError::Map`] while building; boot services are still up.
    /// * [`CommitError::Snapshot`] if the memory map cannot be captured.
    /// * [`CommitError::FirmwareExitRejected`] when every attempt found a
    ///   stale key or firmware refused outright. The root register is not
    ///   touched.
    ///
    /// # Safety
    /// `list` must describe everything that has to stay reachable once the
    /// new root is active, and `image` must be the executing loader. On
    /// success boot services are gone.
    pub unsafe fn commit_address_space<const N: usize>(
        &mut self,
        list: &mut MappingList<N>,
        image: ImageRegion,
    ) -> Result<CommittedAddressSpace, CommitError> {
        unsafe { self.commit_address_space_observed(list, image, |_| {}) }
    }

    /// [`ExitSequencer::commit_address_space`], reporting every state it enters.
    ///
    /// # Errors
    /// As [`ExitSequencer::commit_address_space`].
    ///
    /// # Safety
    /// As [`ExitSequencer::commit_address_space`].
    pub unsafe fn commit_address_space_observed<const N: usize>(
        &mut self,
        list: &mut MappingList<N>,
        image: ImageRegion,
        mut observe: impl FnMut(ExitState),
    ) -> Result<CommittedAddressSpace, CommitError> {
        let Self {
            firmware,
            arena,
            root_register,
            config,
            state,
        } = self;
        let mut enter = |next: ExitState| {
            debug!("firmware exit: {next}");
            *state = next;
            observe(next);
        };

        enter(ExitState::AllocatingRoot);
        let mut aspace = AddressSpaceBuilder::allocate(&mut **arena, config.layout)?;
        let root = aspace.root();

        enter(ExitState::MappingSelf);
        list.register_table_frame(root)?;

        enter(ExitState::MappingImage);
        let (image_base, image_pages) = image.pages()?;
        list.add(
            image_base,
            Some(VirtualAddress::new(image_base.as_u64())),
            image_pages,
            MemoryUseClass::FirmwareTemporary,
        )?;

        enter(ExitState::MappingAllOutstanding);
        aspace.map_outstanding(list)?;

        if config.map_zero_page {
            enter(ExitState::MappingZeroPage);
            aspace.build_mapping(list, VirtualAddress::ZERO, PhysicalAddress::ZERO, 1)?;
            aspace.map_outstanding(list)?;
        }

        let max_attempts = config.exit_attempts.max(1);
        let mut attempts = 0;
        let memory_map = loop {
            enter(ExitState::SnapshottingFirmwareMemoryMap);
            let snapshot = firmware.memory_map()?;

            enter(ExitState::ExitingFirmwareServices);
            attempts += 1;
            match unsafe { firmware.exit_boot_services(snapshot.key) } {
                Ok(map) => break map,
                Err(ExitFailure::StaleMapKey(key)) if attempts < max_attempts => {
                    warn!("memory map key {key:?} went stale, retrying ({attempts}/{max_attempts})");
                }
                Err(last) => {
                    error!("giving up on exiting boot services: {last}");
                    return Err(CommitError::FirmwareExitRejected { attempts, last });
                }
            }
        };

        enter(ExitState::CommittingRootRegister);
        let root = root.base_address();
        unsafe {
            root_register.commit(root);
        }

        enter(ExitState::Done);
        info!("address space rooted at {root} is live");
        Ok(CommittedAddressSpace {
            root,
            memory_map,
            exit_attempts: attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{MapKey, MemoryMapSnapshot};
    use kernel_info::memory::KERNEL_VIRTUAL_BASE;
    use kernel_memory_addresses::PageFrameNumber;
    use kernel_vmem::StaticArena;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Snapshot(MapKey),
        Exit(MapKey),
    }

    /// Firmware that answers the first `stale` exits with a stale key and
    /// every exit with `reject` if set.
    #[derive(Default)]
    struct ScriptedFirmware {
        stale: u32,
        reject: Option<usize>,
        generation: usize,
        calls: Vec<Call>,
    }

    impl ScriptedFirmware {
        fn stale_for(stale: u32) -> Self {
            Self {
                stale,
                ..Self::default()
            }
        }

        fn snapshots(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, Call::Snapshot(_))).count()
        }
    }

    impl Firmware for ScriptedFirmware {
        fn memory_map(&mut self) -> Result<MemoryMapSnapshot, SnapshotError> {
            self.generation += 1;
            let key = MapKey(self.generation);
            self.calls.push(Call::Snapshot(key));
            Ok(MemoryMapSnapshot {
                key,
                map: MemoryMapInfo {
                    mmap_ptr: 0x9000,
                    mmap_len: 48 * self.generation as u64,
                    mmap_desc_size: 48,
                    mmap_desc_version: 1,
                },
            })
        }

        unsafe fn exit_boot_services(&mut self, key: MapKey) -> Result<MemoryMapInfo, ExitFailure> {
            self.calls.push(Call::Exit(key));
            if let Some(status) = self.reject {
                return Err(ExitFailure::Rejected(status));
            }
            if self.stale > 0 {
                self.stale -= 1;
                return Err(ExitFailure::StaleMapKey(key));
            }
            Ok(MemoryMapInfo {
                mmap_ptr: 0x9000,
                mmap_len: 48 * key.0 as u64,
                mmap_desc_size: 48,
                mmap_desc_version: 1,
            })
        }
    }

    #[derive(Default)]
    struct RecordingRegister {
        committed: Vec<PhysicalAddress>,
    }

    impl RootRegister for RecordingRegister {
        unsafe fn commit(&mut self, root: PhysicalAddress) {
            self.committed.push(root);
        }
    }

    const IMAGE: ImageRegion = ImageRegion {
        base: PhysicalAddress::new(0x20_0000),
        size: 0x2800,
    };

    fn config() -> SequencerConfig {
        SequencerConfig {
            layout: PagingLayout::FourLevel,
            ..SequencerConfig::default()
        }
    }

    struct Rig {
        firmware: ScriptedFirmware,
        arena: Box<StaticArena<16>>,
        register: RecordingRegister,
        list: Box<MappingList<32>>,
    }

    impl Rig {
        fn new(firmware: ScriptedFirmware) -> Self {
            Self {
                firmware,
                arena: Box::new(StaticArena::new(PageFrameNumber::new(0x800))),
                register: RecordingRegister::default(),
                list: Box::new(MappingList::new(KERNEL_VIRTUAL_BASE)),
            }
        }

        fn run(&mut self, config: SequencerConfig) -> (Result<CommittedAddressSpace, CommitError>, ExitState, Vec<ExitState>) {
            let mut seen = Vec::new();
            let mut sequencer = ExitSequencer::new(&mut self.firmware, &mut *self.arena, &mut self.register, config);
            let result = unsafe { sequencer.commit_address_space_observed(&mut self.list, IMAGE, |s| seen.push(s)) };
            (result, sequencer.state(), seen)
        }

        fn translate(&mut self, layout: PagingLayout, va: u64) -> Option<PhysicalAddress> {
            let root = self.arena.allocated().next()?;
            let aspace = AddressSpaceBuilder::with_root(&mut *self.arena, layout, root).ok()?;
            aspace.translate(VirtualAddress::new(va))
        }
    }

    #[test]
    fn persistently_stale_key_is_rejected_without_commit() {
        let mut rig = Rig::new(ScriptedFirmware::stale_for(u32::MAX));
        let (result, state, _) = rig.run(config());

        assert_eq!(
            result,
            Err(CommitError::FirmwareExitRejected {
                attempts: 3,
                last: ExitFailure::StaleMapKey(MapKey(3)),
            })
        );
        assert_eq!(state, ExitState::ExitingFirmwareServices);
        assert_eq!(rig.firmware.snapshots(), 3);
        assert!(rig.register.committed.is_empty());
    }

    #[test]
    fn stale_once_retries_with_a_fresh_snapshot() {
        let mut rig = Rig::new(ScriptedFirmware::stale_for(1));
        let (result, state, _) = rig.run(config());
        let committed = result.unwrap();

        assert_eq!(
            rig.firmware.calls,
            [
                Call::Snapshot(MapKey(1)),
                Call::Exit(MapKey(1)),
                Call::Snapshot(MapKey(2)),
                Call::Exit(MapKey(2)),
            ]
        );
        assert_eq!(state, ExitState::Done);
        assert_eq!(committed.exit_attempts, 2);
        assert_eq!(committed.memory_map.mmap_len, 96);
        assert_eq!(rig.register.committed, [PhysicalAddress::new(0x80_0000)]);
        assert_eq!(committed.boot_info().root_table, 0x80_0000);
    }

    #[test]
    fn other_rejections_are_not_retried() {
        let mut rig = Rig::new(ScriptedFirmware {
            reject: Some(0x15),
            ..ScriptedFirmware::default()
        });
        let (result, _, _) = rig.run(config());

        assert_eq!(
            result,
            Err(CommitError::FirmwareExitRejected {
                attempts: 1,
                last: ExitFailure::Rejected(0x15),
            })
        );
        assert_eq!(rig.firmware.snapshots(), 1);
        assert!(rig.register.committed.is_empty());
    }

    #[test]
    fn states_are_entered_in_order() {
        let mut rig = Rig::new(ScriptedFirmware::default());
        let (result, _, seen) = rig.run(config());
        assert!(result.is_ok());
        assert_eq!(
            seen,
            [
                ExitState::AllocatingRoot,
                ExitState::MappingSelf,
                ExitState::MappingImage,
                ExitState::MappingAllOutstanding,
                ExitState::MappingZeroPage,
                ExitState::SnapshottingFirmwareMemoryMap,
                ExitState::ExitingFirmwareServices,
                ExitState::CommittingRootRegister,
                ExitState::Done,
            ]
        );
    }

    #[test]
    fn committed_space_maps_image_zero_page_and_every_table() {
        let mut rig = Rig::new(ScriptedFirmware::default());
        let (result, _, _) = rig.run(config());
        assert!(result.is_ok());

        // The image is identity mapped, including its partial last page.
        for offset in [0, 0x1000, 0x2000] {
            let va = IMAGE.base.as_u64() + offset;
            assert_eq!(rig.translate(PagingLayout::FourLevel, va), Some(PhysicalAddress::new(va)));
        }
        assert_eq!(rig.translate(PagingLayout::FourLevel, 0x20_3000), None);
        assert_eq!(rig.translate(PagingLayout::FourLevel, 0), Some(PhysicalAddress::ZERO));

        let entries: Vec<_> = rig.list.iter().copied().collect();
        let tables: Vec<_> = rig.arena.allocated().collect();
        assert_eq!(rig.list.outstanding(), 0);
        for pfn in tables {
            let entry = entries
                .iter()
                .find(|e| e.physical_address == pfn.base_address())
                .expect("every table frame is registered");
            assert_eq!(entry.class, MemoryUseClass::MemoryData);
            let va = entry.virtual_address.expect("table frames get a virtual address");
            assert_eq!(rig.translate(PagingLayout::FourLevel, va.as_u64()), Some(pfn.base_address()));
        }
    }

    #[test]
    fn zero_page_can_stay_unmapped() {
        let mut rig = Rig::new(ScriptedFirmware::default());
        let (result, _, seen) = rig.run(SequencerConfig {
            map_zero_page: false,
            ..config()
        });
        assert!(result.is_ok());
        assert!(!seen.contains(&ExitState::MappingZeroPage));
        assert_eq!(rig.translate(PagingLayout::FourLevel, 0), None);
    }

    #[test]
    fn build_failures_leave_firmware_alone() {
        let mut firmware = ScriptedFirmware::default();
        let mut arena = StaticArena::<0>::new(PageFrameNumber::new(0x800));
        let mut register = RecordingRegister::default();
        let mut list = MappingList::<4>::new(KERNEL_VIRTUAL_BASE);

        let mut sequencer = ExitSequencer::new(&mut firmware, &mut arena, &mut register, config());
        let result = unsafe { sequencer.commit_address_space(&mut list, IMAGE) };
        assert_eq!(result, Err(CommitError::Map(MapError::AllocationFailure)));
        assert_eq!(sequencer.state(), ExitState::AllocatingRoot);
        assert!(firmware.calls.is_empty());
        assert!(register.committed.is_empty());
    }

    #[test]
    fn image_pages_cover_unaligned_images() {
        let image = ImageRegion {
            base: PhysicalAddress::new(0x1_0800),
            size: 0x1000,
        };
        assert_eq!(image.pages(), Ok((PhysicalAddress::new(0x1_0000), 2)));

        let wrapping = ImageRegion {
            base: PhysicalAddress::new(u64::MAX - 0xFFF),
            size: 0x2000,
        };
        assert_eq!(wrapping.pages(), Err(MapError::AddressOverflow));
    }
}
