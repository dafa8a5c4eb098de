use bitfield_struct::bitfield;

/// CR0 as seen in protected and long mode.
///
/// Only the low 32 bits are architecturally defined; the upper half is
/// modeled as reserved so the same type serves i686 and x86-64.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr0 {
    /// Bit 0: protected mode enable.
    pub protection_enable: bool,

    /// Bit 1: WAIT/FWAIT honors TS.
    pub monitor_coprocessor: bool,

    /// Bit 2: no x87 present, x87 instructions fault with #NM.
    pub emulation: bool,

    /// Bit 3: set by the CPU on a task switch; lazy FPU state.
    pub task_switched: bool,

    /// Bit 4: extension type, hardwired to 1 on modern parts.
    pub extension_type: bool,

    /// Bit 5: report x87 errors through #MF.
    pub numeric_error: bool,

    #[bits(10)]
    __reserved_6_15: u16,

    /// Bit 16: supervisor writes honor read-only pages.
    pub write_protect: bool,

    __reserved_17: bool,

    /// Bit 18: alignment checks in ring 3 when EFLAGS.AC is set.
    pub alignment_mask: bool,

    #[bits(10)]
    __reserved_19_28: u16,

    /// Bit 29: not write-through.
    pub not_write_through: bool,

    /// Bit 30: cache disable.
    pub cache_disable: bool,

    /// Bit 31: paging enable.
    pub paging: bool,

    #[bits(32)]
    __reserved_32_63: u32,
}

impl Cr0 {
    /// FPU bits a fresh thread starts with: no FPU context loaded yet.
    ///
    /// ```rust
    /// # use kernel_registers::cr0::Cr0;
    /// assert_eq!(Cr0::INITIAL_NPX_STATE.into_bits(), 0b1110);
    /// ```
    pub const INITIAL_NPX_STATE: Self = Self::new()
        .with_monitor_coprocessor(true)
        .with_emulation(true)
        .with_task_switched(true);
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let cr0: u64;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let cr0: u32;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(u64::from(cr0))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr0 {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits() as u32;
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_protect_is_bit_16() {
        let cr0 = Cr0::new().with_write_protect(true);
        assert_eq!(cr0.into_bits(), 1 << 16);
    }

    #[test]
    fn setting_write_protect_preserves_other_bits() {
        let firmware = Cr0::from_bits(0x8000_0033);
        let ours = firmware.with_write_protect(true);
        assert!(ours.paging());
        assert!(ours.protection_enable());
        assert_eq!(ours.into_bits(), 0x8001_0033);
    }
}
