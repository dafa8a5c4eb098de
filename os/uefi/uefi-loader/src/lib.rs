//! # UEFI Boot Transition
//!
//! The loader half of the boot: it turns the firmware-owned machine into one
//! running on the kernel's page tables.
//!
//! ```text
//! firmware memory map ──► Mapping List ──► ExitSequencer ──► CR3
//!                              ▲                 │
//!        loader image, tables ─┘                 └─► ExitBootServices (retried on stale key)
//! ```
//!
//! * [`firmware`]: the firmware calls the exit sequence depends on,
//! * [`sequencer`]: the ordered, one-way exit sequence,
//! * [`protocol`]: the Boot Loader Protocol table for loader modules,
//! * [`uefi_firmware`]: all of the above on top of UEFI boot services,
//! * [`logger`]: the `log` backend used until the kernel takes over.
//!
//! The page-table mechanics live in `kernel-vmem`; everything here only
//! orders them against firmware.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod firmware;
pub mod logger;
pub mod protocol;
pub mod sequencer;
pub mod tracing;
pub mod uefi_firmware;
