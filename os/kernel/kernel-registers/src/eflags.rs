use bitfield_struct::bitfield;

/// The 32-bit flags register (the low half of RFLAGS).
///
/// Bit 1 always reads as one; writing zero there is ignored by the CPU, so the
/// model keeps it at its architectural value.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Eflags {
    pub carry: bool,
    #[bits(default = true, access = RO)]
    pub always_one: bool,
    pub parity: bool,
    __reserved_3: bool,
    pub adjust: bool,
    __reserved_5: bool,
    pub zero: bool,
    pub sign: bool,
    pub trap: bool,
    /// Bit 9: maskable interrupts are delivered.
    pub interrupt_enable: bool,
    pub direction: bool,
    pub overflow: bool,
    /// Bits 12–13: I/O privilege level.
    #[bits(2)]
    pub iopl: u8,
    /// Bit 14: the current task is nested; IRET performs a task switch back.
    pub nested_task: bool,
    __reserved_15: bool,
    pub resume: bool,
    pub virtual_8086: bool,
    pub alignment_check: bool,
    pub virtual_interrupt: bool,
    pub virtual_interrupt_pending: bool,
    /// Bit 21: CPUID is available when this bit can be toggled.
    pub id: bool,
    #[bits(10)]
    __reserved_22_31: u16,
}

impl Eflags {
    /// The sanitized value loaded during processor setup: interrupts masked,
    /// no nested task, IOPL 0, direction flag clear.
    #[must_use]
    pub const fn cleared() -> Self {
        Self::new()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegister for Eflags {
    #[allow(clippy::cast_possible_truncation)]
    fn load() -> Self {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq", "pop {}", out(reg) rflags, options(nomem, preserves_flags));
        }
        Self::from_bits(rflags as u32)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Eflags {
    unsafe fn store_unsafe(self) {
        let rflags = u64::from(self.into_bits());
        unsafe {
            core::arch::asm!("push {}", "popfq", in(reg) rflags, options(nomem));
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegister for Eflags {
    fn load() -> Self {
        let eflags: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags));
        }
        Self::from_bits(eflags)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Eflags {
    unsafe fn store_unsafe(self) {
        let eflags = self.into_bits();
        unsafe {
            core::arch::asm!("push {}", "popfd", in(reg) eflags, options(nomem));
        }
    }
}
