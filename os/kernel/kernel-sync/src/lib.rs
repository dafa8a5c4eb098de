//! # Boot-time synchronization primitives
//!
//! Two cells cover everything the boot transition shares across its lifetime:
//!
//! * [`SyncOnceCell`] publishes a value exactly once and hands out shared
//!   references afterwards (tables installed for other modules).
//! * [`StaticCell`] hands out a single `&'static mut` to statically reserved
//!   storage (the bootstrap processor's structures, which the CPU keeps
//!   referencing by address).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod static_cell;
mod sync_once_cell;

pub use static_cell::StaticCell;
pub use sync_once_cell::SyncOnceCell;
