//! # Protected-mode segment descriptors
//!
//! ```text
//!  63      56 55 54 53 52 51  48 47 46 45 44    40 39     32 31          16 15           0
//! +---------+--+--+--+--+------+--+-----+--------+---------+--------------+--------------+
//! | base    |G |DB|0 |AV|limit |P | DPL | type   | base    | base [15:0]  | limit [15:0] |
//! | [31:24] |  |  |  |  |19:16 |  |     | (S+4)  | [23:16] |              |              |
//! +---------+--+--+--+--+------+--+-----+--------+---------+--------------+--------------+
//! ```
//!
//! The five-bit `type` includes the code/data (S) bit, so `0x1A` is an
//! execute/read code segment, `0x12` a read/write data segment and `0x09` an
//! available 32-bit TSS.

use crate::privilege::Dpl;
use bitfield_struct::bitfield;

/// Raw limits at or above this value are stored in 4 KiB units.
pub const GRANULARITY_THRESHOLD: u32 = 0x10_0000;

/// Five-bit descriptor type, including the code/data bit.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DescriptorType(u8);

impl DescriptorType {
    /// Not present.
    pub const NONE: Self = Self(0x00);
    /// Execute/read code segment.
    pub const CODE: Self = Self(0x1A);
    /// Read/write data segment.
    pub const DATA: Self = Self(0x12);
    /// Available 32-bit task state segment.
    pub const TSS_32: Self = Self(0x09);

    /// Sets the accessed bit.
    #[inline]
    #[must_use]
    pub const fn accessed(self) -> Self {
        Self(self.0 | 0x01)
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        Self(v & 0x1F)
    }
}

/// Operand size of a code or data segment.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SegmentMode {
    /// 16-bit default operand size, or a system descriptor.
    Small,
    /// 32-bit default operand size (the DB bit).
    Big,
}

/// One 8-byte GDT entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub limit_low: u16,
    pub base_low: u16,
    pub base_middle: u8,
    #[bits(5)]
    pub descriptor_type: DescriptorType,
    #[bits(2)]
    pub dpl: Dpl,
    pub present: bool,
    #[bits(4)]
    pub limit_high: u8,
    /// Available for system software.
    pub system: bool,
    pub reserved0: bool,
    pub default_big: bool,
    /// Limit counts 4 KiB units when set.
    pub granularity: bool,
    pub base_high: u8,
}

impl SegmentDescriptor {
    /// Encodes a descriptor.
    ///
    /// Limits below [`GRANULARITY_THRESHOLD`] are stored byte-exact; larger
    /// ones are shifted down to 4 KiB units with the granularity bit set. The
    /// entry is present exactly when `ty` is not [`DescriptorType::NONE`].
    #[must_use]
    pub const fn encode(base: u32, limit: u32, ty: DescriptorType, dpl: Dpl, mode: SegmentMode) -> Self {
        let (granularity, limit) = if limit < GRANULARITY_THRESHOLD {
            (false, limit)
        } else {
            (true, limit >> 12)
        };

        Self::new()
            .with_base(base)
            .with_raw_limit(limit)
            .with_granularity(granularity)
            .with_default_big(matches!(mode, SegmentMode::Big))
            .with_dpl(dpl)
            .with_reserved0(false)
            .with_present(ty.into_bits() != 0)
            .with_system(false)
            .with_descriptor_type(ty)
    }

    /// The 32-bit base address.
    #[inline]
    #[must_use]
    pub const fn base(self) -> u32 {
        (self.base_high() as u32) << 24 | (self.base_middle() as u32) << 16 | self.base_low() as u32
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_base(self, base: u32) -> Self {
        self.with_base_low(base as u16)
            .with_base_middle((base >> 16) as u8)
            .with_base_high((base >> 24) as u8)
    }

    /// The 20-bit limit field, in whatever unit the granularity bit selects.
    #[inline]
    #[must_use]
    pub const fn raw_limit(self) -> u32 {
        (self.limit_high() as u32) << 16 | self.limit_low() as u32
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_raw_limit(self, limit: u32) -> Self {
        self.with_limit_low(limit as u16).with_limit_high(((limit >> 16) & 0xF) as u8)
    }

    /// Offset of the last addressable byte.
    #[inline]
    #[must_use]
    pub const fn byte_limit(self) -> u32 {
        if self.granularity() {
            (self.raw_limit() << 12) | 0xFFF
        } else {
            self.raw_limit()
        }
    }
}

const _: () = assert!(size_of::<SegmentDescriptor>() == 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_kernel_code_matches_the_classic_encoding() {
        let d = SegmentDescriptor::encode(0, 0xFFFF_FFFF, DescriptorType::CODE, Dpl::Ring0, SegmentMode::Big);
        assert_eq!(d.into_bits(), 0x00CF_9A00_0000_FFFF);
        let d = SegmentDescriptor::encode(0, 0xFFFF_FFFF, DescriptorType::DATA, Dpl::Ring3, SegmentMode::Big);
        assert_eq!(d.into_bits(), 0x00CF_F200_0000_FFFF);
    }

    #[test]
    fn granularity_round_trip() {
        for limit in [0u32, 0xFFF, 0xFFFF, 0x20AB, 0xF_FFFF] {
            let d = SegmentDescriptor::encode(0, limit, DescriptorType::DATA, Dpl::Ring0, SegmentMode::Small);
            assert!(!d.granularity());
            assert_eq!(d.byte_limit(), limit);
        }
        for limit in [0x10_0000u32, 0x12_3FFF, 0xFFFF_FFFF] {
            let d = SegmentDescriptor::encode(0, limit, DescriptorType::DATA, Dpl::Ring0, SegmentMode::Small);
            assert!(d.granularity());
            assert_eq!(d.raw_limit(), limit >> 12);
            assert_eq!(d.byte_limit(), limit | 0xFFF);
        }
    }

    #[test]
    fn base_round_trip() {
        for base in [0u32, 0x400, 0xB_8000, 0x0002_0000, 0x8123_4567, 0xFFFF_FFFF] {
            let d = SegmentDescriptor::encode(base, 0, DescriptorType::DATA, Dpl::Ring0, SegmentMode::Small);
            assert_eq!(d.base(), base);
        }
    }

    #[test]
    fn type_none_is_not_present() {
        let d = SegmentDescriptor::encode(0x1234, 0xFF, DescriptorType::NONE, Dpl::Ring3, SegmentMode::Big);
        assert!(!d.present());
        assert!(d.default_big());
        let d = SegmentDescriptor::encode(0, 0, DescriptorType::TSS_32, Dpl::Ring0, SegmentMode::Small);
        assert!(d.present());
        assert!(!d.system() && !d.reserved0());
    }

    #[test]
    fn accessed_sets_bit_40() {
        let d = SegmentDescriptor::encode(0, 0xFFF, DescriptorType::DATA.accessed(), Dpl::Ring3, SegmentMode::Big);
        assert_eq!(d.descriptor_type(), DescriptorType::from_bits(0x13));
        assert_eq!((d.into_bits() >> 40) & 0x1F, 0x13);
    }
}
