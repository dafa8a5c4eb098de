//! # Segment selectors
//!
//! ```text
//!  15            3 2  1  0
//! +----------------+--+----+
//! |   Index[12:0]  |TI| RPL|
//! +----------------+--+----+  (TI=0 → GDT, TI=1 → LDT; RPL=0..3)
//! ```
//!
//! The fixed GDT layout gives every slot a well-known selector:
//!
//! | Selector | Constant | Slot |
//! |----------|----------|------|
//! | `0x00` | [`NULL`] | null descriptor |
//! | `0x08` | [`R0_CODE`] | kernel code |
//! | `0x10` | [`R0_DATA`] | kernel data |
//! | `0x18` | [`R3_CODE`] | user code |
//! | `0x20` | [`R3_DATA`] | user data |
//! | `0x28` | [`SYS_TSS`] | system task state segment |
//! | `0x30` | [`R0_PB`] | processor block |
//! | `0x38` | [`R3_TEB`] | thread environment block |
//! | `0x40` | [`VDM_TILE`] | virtual DOS machine tile |
//! | `0x48` | [`R0_LDT`] | local descriptor table |
//! | `0x50` | [`DF_TSS`] | double fault task state segment |
//! | `0x58` | [`NMI_TSS`] | NMI task state segment |
//! | `0x68` | [`VDBS`] | text-mode video memory |
//! | `0x70` | [`ALIAS`] | the GDT itself, as data |

use crate::privilege::Rpl;
use bitfield_struct::bitfield;

/// Which descriptor table a selector addresses.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Table {
    Gdt = 0,
    Ldt = 1,
}

impl Table {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        if bits == 0 { Self::Gdt } else { Self::Ldt }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// A 16-bit segment selector.
///
/// ```rust
/// # use kernel::gdt::selectors::{SegmentSelector, R3_DATA};
/// # use kernel::privilege::Rpl;
/// assert_eq!(SegmentSelector::gdt(4, Rpl::Ring0), R3_DATA);
/// assert_eq!(R3_DATA.with_rpl(Rpl::Ring3).into_bits(), 0x23);
/// ```
#[bitfield(u16)]
#[derive(Eq, PartialEq)]
pub struct SegmentSelector {
    /// Requested Privilege Level (bits 0..1).
    #[bits(2)]
    pub rpl: Rpl,
    /// Table Indicator (bit 2).
    #[bits(1)]
    pub ti: Table,
    /// Descriptor index (bits 3..15).
    #[bits(13)]
    pub index: u16,
}

impl SegmentSelector {
    /// GDT selector for slot `index`.
    #[inline]
    #[must_use]
    pub const fn gdt(index: u16, rpl: Rpl) -> Self {
        Self::new().with_index(index).with_ti(Table::Gdt).with_rpl(rpl)
    }

    /// Byte offset of the descriptor inside its table.
    #[inline]
    #[must_use]
    pub const fn table_offset(self) -> usize {
        self.index() as usize * 8
    }
}

pub const NULL: SegmentSelector = SegmentSelector::gdt(0, Rpl::Ring0);
pub const R0_CODE: SegmentSelector = SegmentSelector::gdt(1, Rpl::Ring0);
pub const R0_DATA: SegmentSelector = SegmentSelector::gdt(2, Rpl::Ring0);
pub const R3_CODE: SegmentSelector = SegmentSelector::gdt(3, Rpl::Ring0);
pub const R3_DATA: SegmentSelector = SegmentSelector::gdt(4, Rpl::Ring0);
pub const SYS_TSS: SegmentSelector = SegmentSelector::gdt(5, Rpl::Ring0);
pub const R0_PB: SegmentSelector = SegmentSelector::gdt(6, Rpl::Ring0);
pub const R3_TEB: SegmentSelector = SegmentSelector::gdt(7, Rpl::Ring0);
pub const VDM_TILE: SegmentSelector = SegmentSelector::gdt(8, Rpl::Ring0);
pub const R0_LDT: SegmentSelector = SegmentSelector::gdt(9, Rpl::Ring0);
pub const DF_TSS: SegmentSelector = SegmentSelector::gdt(10, Rpl::Ring0);
pub const NMI_TSS: SegmentSelector = SegmentSelector::gdt(11, Rpl::Ring0);
pub const VDBS: SegmentSelector = SegmentSelector::gdt(13, Rpl::Ring0);
pub const ALIAS: SegmentSelector = SegmentSelector::gdt(14, Rpl::Ring0);

/// User data with RPL 3, as loaded into DS and ES.
pub const USER_DATA_RPL3: SegmentSelector = R3_DATA.with_rpl(Rpl::Ring3);

#[allow(clippy::items_after_statements)]
const _: () = {
    const fn enc(index: u16, rpl: u16) -> u16 {
        (index << 3) | rpl
    }

    assert!(R0_CODE.into_bits() == 0x08);
    assert!(R0_DATA.into_bits() == 0x10);
    assert!(R3_CODE.into_bits() == 0x18);
    assert!(R3_DATA.into_bits() == enc(4, 0));
    assert!(SYS_TSS.into_bits() == 0x28);
    assert!(R0_PB.into_bits() == 0x30);
    assert!(R3_TEB.into_bits() == 0x38);
    assert!(VDM_TILE.into_bits() == 0x40);
    assert!(R0_LDT.into_bits() == 0x48);
    assert!(DF_TSS.into_bits() == 0x50);
    assert!(NMI_TSS.into_bits() == 0x58);
    assert!(VDBS.into_bits() == 0x68);
    assert!(ALIAS.into_bits() == 0x70);
    assert!(USER_DATA_RPL3.into_bits() == enc(4, 3));
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_fields_unpack() {
        let s = SegmentSelector::from_bits(0x3B);
        assert_eq!(s.index(), 7);
        assert_eq!(s.rpl(), Rpl::Ring3);
        assert_eq!(s.ti(), Table::Gdt);
        assert_eq!(s.table_offset(), 0x38);
    }

    #[test]
    fn ldt_bit_is_bit_2() {
        let s = SegmentSelector::gdt(1, Rpl::Ring0).with_ti(Table::Ldt);
        assert_eq!(s.into_bits(), 0x0C);
    }
}
