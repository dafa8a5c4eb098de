//! # Typed x86 Control Registers
//!
//! Bit-exact models of the registers the boot transition touches:
//!
//! * [`cr0::Cr0`]: write protection and FPU control bits,
//! * [`cr3::Cr3`]: physical base of the top-level page table,
//! * [`eflags::Eflags`]: the flags register, cleared during processor setup.
//!
//! The models are plain integers with generated accessors, so they can be
//! built and inspected on any host. Actually moving them into or out of the
//! CPU is gated behind the `asm` feature and the matching target architecture.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires ring 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The register access is privileged and requires ring 0. Storing a value
    /// may change how every subsequent memory access is resolved.
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    fn load() -> Self;
}

pub trait StoreRegister {
    fn store(self);
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

impl<T> StoreRegisterUnsafe for T
where
    T: StoreRegister,
{
    #[inline]
    unsafe fn store_unsafe(self) {
        <Self as StoreRegister>::store(self);
    }
}
