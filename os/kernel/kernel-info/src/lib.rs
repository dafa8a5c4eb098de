//! # Kernel Layout and Boot Handoff
//!
//! Values the loader and the kernel must agree on without talking to each
//! other:
//!
//! * [`memory`]: virtual layout constants and stack sizes,
//! * [`boot`]: the `#[repr(C)]` record passed from the loader to the kernel.
//!
//! ```text
//! 64-bit loader view
//!
//! 0x0000_0000_0000_0000 ┌──────────────────────────────┐
//!                       │ zero page, identity-mapped   │
//!                       │ loader image (temporary)     │
//!                       ├──────────────────────────────┤
//!                       │            ...               │
//! KSEG0_BASE            ├──────────────────────────────┤ 0xFFFF_F800_0000_0000
//!                       │ kernel segment               │
//! KERNEL_VIRTUAL_BASE   ├──────────────────────────────┤ KSEG0_BASE + KSEG0_KERNEL_BASE
//!                       │ tables, firmware data, ...   │
//!                       │ (handed out bottom-up)       │
//! 0xFFFF_FFFF_FFFF_FFFF └──────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;
