//! # Firmware Services
//!
//! The two firmware calls the exit sequence cannot do without: capturing the
//! memory map and exiting boot services with that map's key. The loader backs
//! them with UEFI boot services; tests script them.

use kernel_info::boot::MemoryMapInfo;

/// Identifies one generation of the firmware memory map.
///
/// Any allocation or free in firmware invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapKey(pub usize);

/// A captured memory map together with the key exiting boot services needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapSnapshot {
    pub key: MapKey,
    pub map: MemoryMapInfo,
}

/// Why firmware refused to give up boot services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExitFailure {
    /// The map changed after the snapshot was taken. Taking a new snapshot
    /// and trying again may succeed.
    #[error("memory map key {0:?} is stale")]
    StaleMapKey(MapKey),
    #[error("firmware rejected the exit (status {0:#x})")]
    Rejected(usize),
}

/// The memory map could not be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("firmware memory map unavailable (status {0:#x})")]
pub struct SnapshotError(pub usize);

/// Firmware memory services as seen by the exit sequence.
pub trait Firmware {
    /// Captures the current memory map and its key.
    ///
    /// # Errors
    /// [`SnapshotError`] if firmware cannot produce the map.
    fn memory_map(&mut self) -> Result<MemoryMapSnapshot, SnapshotError>;

    /// Exits boot services with `key` and returns the memory map as it
    /// stands after the exit.
    ///
    /// # Errors
    /// [`ExitFailure::StaleMapKey`] if `key` no longer matches the map, any
    /// other refusal as [`ExitFailure::Rejected`]. Both mean boot services are
    /// still available; once firmware accepted the exit this must succeed.
    ///
    /// # Safety
    /// On success firmware boot services are gone: nothing may allocate from,
    /// print through or otherwise call into them afterwards.
    unsafe fn exit_boot_services(&mut self, key: MapKey) -> Result<MemoryMapInfo, ExitFailure>;
}
