//! # 32-bit Task State Segment
//!
//! On i686 the TSS serves three purposes:
//!
//! - `esp0`/`ss0` give the stack the CPU switches to when a ring 3 thread
//!   traps into the kernel.
//! - The I/O access map restricts `in`/`out` for code running above IOPL.
//!   The bitmap is filled with ones, so every port is denied.
//! - A task gate in the IDT makes the CPU save the whole register file into
//!   the current TSS and load a complete new context from another one. The
//!   double fault and NMI handlers run this way, on their own stack and with
//!   a freshly loaded `CR3`, so they survive a corrupted kernel stack.
//!
//! ```text
//! 0x0000 backlink | esp0 | ss0 | unused[4] | cr3 | eip | eflags
//! 0x0028 eax ecx edx ebx esp ebp esi edi
//! 0x0048 es cs ss ds fs gs ldt (each padded to 32 bits)
//! 0x0064 flags | io_map_base
//! 0x0068 direction_map[32] | io_map[8196]
//! 0x208C int_direction_map[32]
//! 0x20AC end
//! ```

use crate::gdt::selectors::{R0_CODE, R0_DATA, R0_LDT, R0_PB, USER_DATA_RPL3};

/// Bytes in the I/O permission bitmap (65536 ports plus the trailing byte).
pub const IO_ACCESS_MAP_SIZE: usize = 8196;

/// Bytes in an interrupt direction map.
pub const DIRECTION_MAP_SIZE: usize = 32;

/// Size of a [`Ktss`] in bytes.
pub const TSS_SIZE: usize = size_of::<Ktss>();

/// Interrupts DPMI hosts reflect to virtual-8086 mode: byte 0 bit 2 (INT 2)
/// and bits 3-4 of bytes 3 and 4.
const DPMI_DIRECTION_PATTERN: [(usize, u8); 3] = [(0, 0x04), (3, 0x18), (4, 0x18)];

#[repr(C)]
#[derive(Clone)]
pub struct IoAccessMap {
    pub direction_map: [u8; DIRECTION_MAP_SIZE],
    pub io_map: [u8; IO_ACCESS_MAP_SIZE],
}

#[repr(C)]
#[derive(Clone)]
pub struct Ktss {
    pub backlink: u16,
    reserved0: u16,
    pub esp0: u32,
    pub ss0: u16,
    reserved1: u16,
    pub not_used1: [u32; 4],
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    reserved2: u16,
    pub cs: u16,
    reserved3: u16,
    pub ss: u16,
    reserved4: u16,
    pub ds: u16,
    reserved5: u16,
    pub fs: u16,
    reserved6: u16,
    pub gs: u16,
    reserved7: u16,
    pub ldt: u16,
    reserved8: u16,
    pub flags: u16,
    pub io_map_base: u16,
    pub io_maps: [IoAccessMap; 1],
    pub int_direction_map: [u8; DIRECTION_MAP_SIZE],
}

/// Context a fatal-trap task starts with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FatalTaskState {
    /// Entry point of the handler.
    pub handler: u32,
    /// Top of the dedicated fault stack.
    pub stack: u32,
    /// Page-table base at the time of setup.
    pub cr3: u32,
    /// Stack segment at the time of setup.
    pub ss: u16,
}

impl Ktss {
    pub const ZEROED: Self = Self {
        backlink: 0,
        reserved0: 0,
        esp0: 0,
        ss0: 0,
        reserved1: 0,
        not_used1: [0; 4],
        cr3: 0,
        eip: 0,
        eflags: 0,
        eax: 0,
        ecx: 0,
        edx: 0,
        ebx: 0,
        esp: 0,
        ebp: 0,
        esi: 0,
        edi: 0,
        es: 0,
        reserved2: 0,
        cs: 0,
        reserved3: 0,
        ss: 0,
        reserved4: 0,
        ds: 0,
        reserved5: 0,
        fs: 0,
        reserved6: 0,
        gs: 0,
        reserved7: 0,
        ldt: 0,
        reserved8: 0,
        flags: 0,
        io_map_base: 0,
        io_maps: [IoAccessMap {
            direction_map: [0; DIRECTION_MAP_SIZE],
            io_map: [0; IO_ACCESS_MAP_SIZE],
        }],
        int_direction_map: [0; DIRECTION_MAP_SIZE],
    };

    /// Sets up the processor's main task segment.
    ///
    /// Denies all port I/O, installs the DPMI direction pattern and points
    /// `esp0` at the boot stack.
    #[allow(clippy::cast_possible_truncation)]
    pub fn init_main(&mut self, boot_stack: u32) {
        self.io_maps[0].io_map.fill(0xFF);
        self.io_maps[0].direction_map = dpmi_direction_map();
        self.int_direction_map = dpmi_direction_map();

        self.io_map_base = TSS_SIZE as u16;
        self.flags = 0;
        self.ldt = R0_LDT.into_bits();
        self.esp0 = boot_stack;
        self.ss0 = R0_DATA.into_bits();
    }

    /// Sets up a task segment entered through a task gate.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn init_fatal(&mut self, state: &FatalTaskState) {
        self.io_map_base = TSS_SIZE as u16;
        self.flags = 0;
        self.ldt = R0_LDT.into_bits();
        self.cr3 = state.cr3;
        self.esp = state.stack;
        self.esp0 = state.stack;
        self.eip = state.handler;
        self.cs = R0_CODE.into_bits();
        self.ds = USER_DATA_RPL3.into_bits();
        self.es = USER_DATA_RPL3.into_bits();
        self.fs = R0_PB.into_bits();
        self.ss0 = R0_DATA.into_bits();
        self.ss = state.ss;
    }

    /// Whether port `port` is allowed by the bitmap.
    #[must_use]
    pub const fn port_allowed(&self, port: u16) -> bool {
        let byte = self.io_maps[0].io_map[port as usize / 8];
        byte & (1 << (port % 8)) == 0
    }
}

fn dpmi_direction_map() -> [u8; DIRECTION_MAP_SIZE] {
    let mut map = [0; DIRECTION_MAP_SIZE];
    for (index, value) in DPMI_DIRECTION_PATTERN {
        map[index] = value;
    }
    map
}

const _: () = {
    assert!(TSS_SIZE == 0x20AC);
    assert!(core::mem::offset_of!(Ktss, esp0) == 4);
    assert!(core::mem::offset_of!(Ktss, cr3) == 0x1C);
    assert!(core::mem::offset_of!(Ktss, eip) == 0x20);
    assert!(core::mem::offset_of!(Ktss, es) == 0x48);
    assert!(core::mem::offset_of!(Ktss, ldt) == 0x60);
    assert!(core::mem::offset_of!(Ktss, io_map_base) == 0x66);
    assert!(core::mem::offset_of!(Ktss, io_maps) == 0x68);
    assert!(core::mem::offset_of!(Ktss, int_direction_map) == 0x208C);
};

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed() -> Box<Ktss> {
        Box::new(Ktss::ZEROED)
    }

    #[test]
    fn main_tss_denies_all_ports() {
        let mut tss = boxed();
        tss.init_main(0x8000_4000);
        assert!(!tss.port_allowed(0));
        assert!(!tss.port_allowed(0x402));
        assert!(!tss.port_allowed(u16::MAX));
        assert!(tss.io_maps[0].io_map.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn main_tss_carries_the_dpmi_pattern() {
        let mut tss = boxed();
        tss.io_maps[0].direction_map.fill(0xAA);
        tss.init_main(0x8000_4000);
        for map in [&tss.io_maps[0].direction_map, &tss.int_direction_map] {
            assert_eq!(&map[..6], &[0x04, 0, 0, 0x18, 0x18, 0]);
            assert!(map[5..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn main_tss_stack_and_selectors() {
        let mut tss = boxed();
        tss.init_main(0x8000_4000);
        assert_eq!(tss.esp0, 0x8000_4000);
        assert_eq!(tss.ss0, 0x10);
        assert_eq!(tss.ldt, 0x48);
        assert_eq!(tss.flags, 0);
        assert_eq!(usize::from(tss.io_map_base), TSS_SIZE);
    }

    #[test]
    fn fatal_task_starts_on_the_fault_stack() {
        let mut tss = boxed();
        tss.init_fatal(&FatalTaskState {
            handler: 0x8010_2030,
            stack: 0x8000_8000,
            cr3: 0x0012_3000,
            ss: 0x10,
        });
        assert_eq!(tss.eip, 0x8010_2030);
        assert_eq!(tss.esp, 0x8000_8000);
        assert_eq!(tss.esp0, 0x8000_8000);
        assert_eq!(tss.cr3, 0x0012_3000);
        assert_eq!((tss.cs, tss.ds, tss.es, tss.fs), (0x08, 0x23, 0x23, 0x30));
        assert_eq!((tss.ss0, tss.ss), (0x10, 0x10));
        assert_eq!(tss.ldt, 0x48);
        assert_eq!(usize::from(tss.io_map_base), TSS_SIZE);
    }
}
