//! # Processor control
//!
//! Every privileged instruction processor setup needs goes through
//! [`ProcessorControl`]. [`NativeProcessor`] executes them on an i686 CPU;
//! tests substitute a recorder and inspect the calls.

use crate::cpuid::CpuidResult;
use crate::gdt::selectors::SegmentSelector;
use crate::run_level::RunLevel;
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::eflags::Eflags;

/// Pseudo-descriptor consumed by `lgdt` and `lidt`.
///
/// The CPU reads exactly `limit + 1` bytes starting at `base`.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorTableRegister {
    /// Size of the table minus one.
    pub limit: u16,
    /// Linear address of the table.
    pub base: u32,
}

impl DescriptorTableRegister {
    #[must_use]
    pub const fn new(base: u32, limit: u16) -> Self {
        Self { limit, base }
    }
}

/// Segment registers reloaded after the new GDT is active.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentLoad {
    /// CS, reloaded with a far return.
    pub code: SegmentSelector,
    /// DS and ES.
    pub data: SegmentSelector,
    /// FS, which addresses the processor block.
    pub processor_block: SegmentSelector,
}

/// Privileged processor operations used during setup.
///
/// Reads are safe. Anything that changes how the CPU resolves selectors,
/// delivers interrupts or protects memory is `unsafe`.
pub trait ProcessorControl {
    /// # Safety
    /// The table must stay mapped and unchanged in layout while loaded.
    unsafe fn load_gdt(&mut self, gdtr: DescriptorTableRegister);

    /// # Safety
    /// The table must stay mapped while loaded; every present gate must
    /// reference valid code or a valid task.
    unsafe fn load_idt(&mut self, idtr: DescriptorTableRegister);

    /// # Safety
    /// The selector must name an available TSS descriptor in the loaded GDT.
    unsafe fn load_task_register(&mut self, selector: SegmentSelector);

    /// # Safety
    /// The selectors must name present descriptors in the loaded GDT.
    unsafe fn load_segments(&mut self, segments: SegmentLoad);

    /// # Safety
    /// Interrupts at or below `level` are held back; callers own the
    /// consequences for pending work.
    unsafe fn set_run_level(&mut self, level: RunLevel);

    /// # Safety
    /// Changes the interrupt flag and IOPL of the running code.
    unsafe fn set_eflags(&mut self, flags: Eflags);

    /// # Safety
    /// Changes memory protection and FPU behavior.
    unsafe fn set_cr0(&mut self, cr0: Cr0);

    fn cr0(&mut self) -> Cr0;

    fn cr3(&mut self) -> Cr3;

    fn stack_segment(&mut self) -> SegmentSelector;

    fn cpuid(&mut self, leaf: u32) -> CpuidResult;
}

/// The executing i686 processor.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default)]
pub struct NativeProcessor;

#[cfg(target_arch = "x86")]
impl ProcessorControl for NativeProcessor {
    unsafe fn load_gdt(&mut self, gdtr: DescriptorTableRegister) {
        unsafe {
            core::arch::asm!(
                "lgdt [{}]",
                in(reg) &raw const gdtr,
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    unsafe fn load_idt(&mut self, idtr: DescriptorTableRegister) {
        unsafe {
            core::arch::asm!(
                "lidt [{}]",
                in(reg) &raw const idtr,
                options(readonly, nostack, preserves_flags)
            );
        }
    }

    unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
        unsafe {
            core::arch::asm!(
                "ltr {0:x}",
                in(reg) selector.into_bits(),
                options(nostack, preserves_flags)
            );
        }
    }

    unsafe fn load_segments(&mut self, segments: SegmentLoad) {
        unsafe {
            core::arch::asm!(
                "push {cs:e}",
                "lea {tmp:e}, [2f]",
                "push {tmp:e}",
                "retf",
                "2:",
                "mov ds, {ds:x}",
                "mov es, {ds:x}",
                "mov fs, {fs:x}",
                cs = in(reg) u32::from(segments.code.into_bits()),
                ds = in(reg) segments.data.into_bits(),
                fs = in(reg) segments.processor_block.into_bits(),
                tmp = out(reg) _,
                options(preserves_flags)
            );
        }
    }

    unsafe fn set_run_level(&mut self, level: RunLevel) {
        // SAFETY: the local APIC is mapped at its architectural address.
        unsafe {
            core::ptr::write_volatile(
                crate::run_level::APIC_TPR as *mut u32,
                level.to_task_priority(),
            );
        }
    }

    unsafe fn set_eflags(&mut self, flags: Eflags) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { flags.store_unsafe() }
    }

    unsafe fn set_cr0(&mut self, cr0: Cr0) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { cr0.store_unsafe() }
    }

    fn cr0(&mut self) -> Cr0 {
        use kernel_registers::LoadRegisterUnsafe;
        // SAFETY: processor setup runs in ring 0.
        unsafe { Cr0::load_unsafe() }
    }

    fn cr3(&mut self) -> Cr3 {
        use kernel_registers::LoadRegisterUnsafe;
        // SAFETY: processor setup runs in ring 0.
        unsafe { Cr3::load_unsafe() }
    }

    fn stack_segment(&mut self) -> SegmentSelector {
        let ss: u16;
        unsafe {
            core::arch::asm!("mov {0:x}, ss", out(reg) ss, options(nomem, nostack, preserves_flags));
        }
        SegmentSelector::from_bits(ss)
    }

    #[allow(unused_assignments)]
    fn cpuid(&mut self, leaf: u32) -> CpuidResult {
        let (mut eax, mut ebx, mut ecx, mut edx) = (leaf, 0u32, 0u32, 0u32);
        unsafe {
            core::arch::asm!(
                "push ebx",
                "cpuid",
                "mov {ebx_out:e}, ebx",
                "pop ebx",
                ebx_out = lateout(reg) ebx,
                inlateout("eax") eax,
                inlateout("ecx") ecx,
                lateout("edx") edx,
                options(nomem, preserves_flags),
            );
        }
        CpuidResult { eax, ebx, ecx, edx }
    }
}

/// Linear address of `value` as the 32-bit descriptor tables see it.
///
/// Truncates on hosts with wider pointers, where the value only serves as a
/// stable identifier.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn linear_address<T: ?Sized>(value: *const T) -> u32 {
    value.cast::<u8>() as usize as u32
}

#[cfg(test)]
pub(crate) mod recorder {
    use super::*;

    /// One privileged operation, as seen by [`Recorder`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        Gdt(DescriptorTableRegister),
        Idt(DescriptorTableRegister),
        TaskRegister(SegmentSelector),
        Segments(SegmentLoad),
        RunLevel(RunLevel),
        Eflags(Eflags),
        Cr0(Cr0),
    }

    /// Records every privileged operation and answers reads with canned values.
    pub struct Recorder {
        pub calls: Vec<Call>,
        pub cr0: Cr0,
        pub cr3: Cr3,
        pub ss: SegmentSelector,
        pub leaves: [CpuidResult; 2],
    }

    impl Recorder {
        pub fn new(leaves: [CpuidResult; 2]) -> Self {
            Self {
                calls: Vec::new(),
                cr0: Cr0::from_bits(0x8000_0011),
                cr3: Cr3::from_bits(0x0012_3000),
                ss: crate::gdt::selectors::R0_DATA,
                leaves,
            }
        }
    }

    impl ProcessorControl for Recorder {
        unsafe fn load_gdt(&mut self, gdtr: DescriptorTableRegister) {
            self.calls.push(Call::Gdt(gdtr));
        }

        unsafe fn load_idt(&mut self, idtr: DescriptorTableRegister) {
            self.calls.push(Call::Idt(idtr));
        }

        unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
            self.calls.push(Call::TaskRegister(selector));
        }

        unsafe fn load_segments(&mut self, segments: SegmentLoad) {
            self.calls.push(Call::Segments(segments));
        }

        unsafe fn set_run_level(&mut self, level: RunLevel) {
            self.calls.push(Call::RunLevel(level));
        }

        unsafe fn set_eflags(&mut self, flags: Eflags) {
            self.calls.push(Call::Eflags(flags));
        }

        unsafe fn set_cr0(&mut self, cr0: Cr0) {
            self.cr0 = cr0;
            self.calls.push(Call::Cr0(cr0));
        }

        fn cr0(&mut self) -> Cr0 {
            self.cr0
        }

        fn cr3(&mut self) -> Cr3 {
            self.cr3
        }

        fn stack_segment(&mut self) -> SegmentSelector {
            self.ss
        }

        fn cpuid(&mut self, leaf: u32) -> CpuidResult {
            self.leaves.get(leaf as usize).copied().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_descriptor_is_six_bytes() {
        assert_eq!(size_of::<DescriptorTableRegister>(), 6);
        let r = DescriptorTableRegister::new(0x8000_9000, 0x3FF);
        let limit = r.limit;
        let base = r.base;
        assert_eq!((limit, base), (0x3FF, 0x8000_9000));
    }
}
