//! # Boot Loader Protocol
//!
//! A fixed-layout table of loader services that loosely coupled modules call
//! through instead of linking against the loader. It is installed once and
//! read from anywhere afterwards.
//!
//! ```text
//! ┌──────────────────┐
//! │ debug_print      │ ─► QEMU debug console
//! │ console_print    │ ─► firmware text console
//! │ open_volume      │ ─► boot volume handle
//! │ close_volume     │
//! │ open_protocol    │ ─► first handle supporting a GUID
//! │ close_protocol   │
//! └──────────────────┘
//! ```

use core::ffi::c_void;
use core::fmt;
use core::ptr::NonNull;
use kernel_sync::SyncOnceCell;
use log::debug;
use uefi::Guid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol unavailable")]
    Unavailable,
    #[error("boot loader protocol is not installed")]
    NotInstalled,
    #[error("boot loader protocol is already installed")]
    AlreadyInstalled,
}

/// A volume opened through [`BootLoaderProtocol::open_volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeHandle(pub NonNull<c_void>);

/// A firmware handle found through [`BootLoaderProtocol::open_protocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHandle(pub NonNull<c_void>);

/// A protocol picked from a candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedProtocol {
    pub guid: Guid,
    pub handle: ProtocolHandle,
}

pub type PrintFn = fn(fmt::Arguments);
pub type OpenVolumeFn = fn() -> Result<VolumeHandle, ProtocolError>;
pub type CloseVolumeFn = fn(VolumeHandle) -> Result<(), ProtocolError>;
pub type OpenProtocolFn = fn(&Guid) -> Result<ProtocolHandle, ProtocolError>;
pub type CloseProtocolFn = fn(ProtocolHandle, &Guid) -> Result<(), ProtocolError>;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BootLoaderProtocol {
    pub debug_print: PrintFn,
    pub console_print: PrintFn,
    pub open_volume: OpenVolumeFn,
    pub close_volume: CloseVolumeFn,
    pub open_protocol: OpenProtocolFn,
    pub close_protocol: CloseProtocolFn,
}

static PROTOCOL: SyncOnceCell<BootLoaderProtocol> = SyncOnceCell::new();

/// Publishes `protocol` for the rest of the boot.
///
/// # Errors
/// [`ProtocolError::AlreadyInstalled`] on every call after the first.
pub fn install(protocol: BootLoaderProtocol) -> Result<&'static BootLoaderProtocol, ProtocolError> {
    PROTOCOL.set(protocol).map_err(|_| ProtocolError::AlreadyInstalled)
}

/// The installed table.
///
/// # Errors
/// [`ProtocolError::NotInstalled`] before [`install`].
pub fn get() -> Result<&'static BootLoaderProtocol, ProtocolError> {
    PROTOCOL.get().ok_or(ProtocolError::NotInstalled)
}

impl BootLoaderProtocol {
    /// Opens the first of `candidates` that firmware provides.
    ///
    /// A candidate reporting [`ProtocolError::Unavailable`] falls through to
    /// the next one; any other error ends the search.
    ///
    /// # Errors
    /// [`ProtocolError::Unavailable`] if no candidate is available.
    pub fn open_first_available(&self, candidates: &[Guid]) -> Result<OpenedProtocol, ProtocolError> {
        for guid in candidates {
            match (self.open_protocol)(guid) {
                Ok(handle) => {
                    debug!("opened protocol {guid}");
                    return Ok(OpenedProtocol { guid: *guid, handle });
                }
                Err(ProtocolError::Unavailable) => debug!("protocol {guid} unavailable"),
                Err(e) => return Err(e),
            }
        }
        Err(ProtocolError::Unavailable)
    }

    /// Closes a protocol returned by [`BootLoaderProtocol::open_first_available`].
    ///
    /// # Errors
    /// Whatever the installed close routine reports.
    pub fn close(&self, opened: OpenedProtocol) -> Result<(), ProtocolError> {
        (self.close_protocol)(opened.handle, &opened.guid)
    }

    pub fn debug(&self, args: fmt::Arguments) {
        (self.debug_print)(args);
    }

    pub fn print(&self, args: fmt::Arguments) {
        (self.console_print)(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi::guid;

    const PREFERRED: Guid = guid!("9042a9de-23dc-4a38-96fb-7aded080516a");
    const FALLBACK: Guid = guid!("982c298b-f4fa-41cb-b838-77aa688fb839");
    const BROKEN: Guid = guid!("00000000-0000-0000-0000-000000000001");

    fn handle() -> ProtocolHandle {
        ProtocolHandle(NonNull::dangling())
    }

    fn ignore(_: fmt::Arguments) {}

    fn no_volume() -> Result<VolumeHandle, ProtocolError> {
        Err(ProtocolError::Unavailable)
    }

    fn close_volume(_: VolumeHandle) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn only_fallback(guid: &Guid) -> Result<ProtocolHandle, ProtocolError> {
        if *guid == FALLBACK {
            Ok(handle())
        } else if *guid == BROKEN {
            Err(ProtocolError::NotInstalled)
        } else {
            Err(ProtocolError::Unavailable)
        }
    }

    fn close_protocol(_: ProtocolHandle, _: &Guid) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn table() -> BootLoaderProtocol {
        BootLoaderProtocol {
            debug_print: ignore,
            console_print: ignore,
            open_volume: no_volume,
            close_volume,
            open_protocol: only_fallback,
            close_protocol,
        }
    }

    #[test]
    fn falls_back_to_the_next_candidate() {
        let opened = table().open_first_available(&[PREFERRED, FALLBACK]).unwrap();
        assert_eq!(opened.guid, FALLBACK);
        assert_eq!(table().close(opened), Ok(()));
    }

    #[test]
    fn exhausted_candidates_are_unavailable() {
        assert_eq!(
            table().open_first_available(&[PREFERRED]),
            Err(ProtocolError::Unavailable)
        );
        assert_eq!(table().open_first_available(&[]), Err(ProtocolError::Unavailable));
    }

    #[test]
    fn other_errors_stop_the_search() {
        assert_eq!(
            table().open_first_available(&[BROKEN, FALLBACK]),
            Err(ProtocolError::NotInstalled)
        );
    }

    #[test]
    fn installs_exactly_once() {
        assert!(install(table()).is_ok());
        assert_eq!(install(table()).err(), Some(ProtocolError::AlreadyInstalled));
        let installed = get().unwrap();
        assert_eq!((installed.open_volume)(), Err(ProtocolError::Unavailable));
    }
}
