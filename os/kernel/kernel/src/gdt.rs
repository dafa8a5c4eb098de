//! # Global Descriptor Table
//!
//! Every processor owns a 128-entry GDT with a fixed layout (see
//! [`selectors`] for the slot map). Code and data segments are flat; the
//! interesting entries point at per-processor structures:
//!
//! * [`selectors::SYS_TSS`] → the processor's main task state segment,
//! * [`selectors::R0_PB`] → the processor block, reached through `FS`,
//! * [`selectors::ALIAS`] → the GDT itself, so it can be edited as data,
//! * [`selectors::DF_TSS`] / [`selectors::NMI_TSS`] → the task state segments
//!   entered by the double fault and NMI task gates.
//!
//! Addresses are 32-bit linear addresses.

pub mod descriptor;
pub mod selectors;

use crate::gdt::descriptor::{DescriptorType, SegmentDescriptor, SegmentMode};
use crate::gdt::selectors::SegmentSelector;
use crate::privilege::Dpl;
use kernel_info::memory::GDT_ENTRIES;

/// Size of a GDT in bytes.
pub const GDT_SIZE: usize = GDT_ENTRIES * size_of::<SegmentDescriptor>();

/// Value for the GDTR limit field.
#[allow(clippy::cast_possible_truncation)]
pub const GDT_LIMIT: u16 = (GDT_SIZE - 1) as u16;

/// Placeholder base of the auxiliary task state segments.
const PLACEHOLDER_TSS_BASE: u32 = 0x2_0000;

/// Linear addresses the fixed layout refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GdtTargets {
    /// The GDT being built.
    pub gdt: u32,
    /// The processor's main TSS.
    pub tss: u32,
    pub tss_size: u32,
    /// The processor block.
    pub processor_block: u32,
    pub processor_block_size: u32,
}

#[repr(C, align(8))]
#[derive(Clone)]
pub struct Gdt([SegmentDescriptor; GDT_ENTRIES]);

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    /// A table of null descriptors.
    #[must_use]
    pub const fn new() -> Self {
        Self([SegmentDescriptor::new(); GDT_ENTRIES])
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, selector: SegmentSelector) -> SegmentDescriptor {
        self.0[selector.index() as usize]
    }

    #[inline]
    pub const fn set_entry(&mut self, selector: SegmentSelector, descriptor: SegmentDescriptor) {
        self.0[selector.index() as usize] = descriptor;
    }

    /// Encodes and stores one descriptor.
    #[inline]
    pub const fn set(
        &mut self,
        selector: SegmentSelector,
        base: u32,
        limit: u32,
        ty: DescriptorType,
        dpl: Dpl,
        mode: SegmentMode,
    ) {
        self.set_entry(selector, SegmentDescriptor::encode(base, limit, ty, dpl, mode));
    }

    /// Replaces only the base address of an existing descriptor.
    #[inline]
    pub const fn set_base(&mut self, selector: SegmentSelector, base: u32) {
        let d = self.entry(selector).with_base(base);
        self.set_entry(selector, d);
    }

    /// Fills in the fixed processor layout. Unlisted slots become null.
    pub fn build(&mut self, targets: &GdtTargets) {
        use crate::gdt::descriptor::DescriptorType as Ty;
        use crate::gdt::selectors::{
            ALIAS, DF_TSS, NMI_TSS, NULL, R0_CODE, R0_DATA, R0_LDT, R0_PB, R3_CODE, R3_DATA,
            R3_TEB, SYS_TSS, VDBS, VDM_TILE,
        };
        use SegmentMode::{Big, Small};

        *self = Self::new();
        self.set(NULL, 0, 0, Ty::NONE, Dpl::Ring0, Small);
        self.set(R0_CODE, 0, 0xFFFF_FFFF, Ty::CODE, Dpl::Ring0, Big);
        self.set(R0_DATA, 0, 0xFFFF_FFFF, Ty::DATA, Dpl::Ring0, Big);
        self.set(R3_CODE, 0, 0xFFFF_FFFF, Ty::CODE, Dpl::Ring3, Big);
        self.set(R3_DATA, 0, 0xFFFF_FFFF, Ty::DATA, Dpl::Ring3, Big);
        self.set(SYS_TSS, targets.tss, targets.tss_size - 1, Ty::TSS_32, Dpl::Ring0, Small);
        self.set(
            R0_PB,
            targets.processor_block,
            targets.processor_block_size,
            Ty::DATA,
            Dpl::Ring0,
            Big,
        );
        self.set(R3_TEB, 0, 0xFFF, Ty::DATA.accessed(), Dpl::Ring3, Big);
        self.set(VDM_TILE, 0x0400, 0xFFFF, Ty::DATA, Dpl::Ring3, Small);
        self.set(R0_LDT, 0, 0, Ty::NONE, Dpl::Ring0, Small);
        self.set(DF_TSS, PLACEHOLDER_TSS_BASE, 0xFFFF, Ty::TSS_32, Dpl::Ring0, Small);
        self.set(NMI_TSS, PLACEHOLDER_TSS_BASE, 0xFFFF, Ty::CODE, Dpl::Ring0, Small);
        self.set(VDBS, 0xB_8000, 0x3FFF, Ty::DATA, Dpl::Ring0, Small);
        self.set(ALIAS, targets.gdt, u32::from(GDT_LIMIT), Ty::DATA, Dpl::Ring0, Small);
    }

    /// Points `selector` at a task state segment of `size` bytes.
    ///
    /// Keeps granularity and operand size of the existing entry.
    pub const fn describe_task_segment(&mut self, selector: SegmentSelector, base: u32, size: u32) {
        let d = self
            .entry(selector)
            .with_base(base)
            .with_raw_limit(size - 1)
            .with_dpl(Dpl::Ring0)
            .with_present(true)
            .with_descriptor_type(DescriptorType::TSS_32);
        self.set_entry(selector, d);
    }

    #[inline]
    #[must_use]
    pub const fn entries(&self) -> &[SegmentDescriptor; GDT_ENTRIES] {
        &self.0
    }
}

const _: () = assert!(GDT_SIZE == 1024 && GDT_LIMIT == 0x3FF);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdt::selectors::{
        ALIAS, DF_TSS, NMI_TSS, NULL, R0_CODE, R0_DATA, R0_LDT, R0_PB, R3_CODE, R3_DATA, R3_TEB,
        SYS_TSS, VDBS, VDM_TILE,
    };

    const TARGETS: GdtTargets = GdtTargets {
        gdt: 0x8000_9000,
        tss: 0x8000_A100,
        tss_size: 0x20AC,
        processor_block: 0x8000_9400,
        processor_block_size: 0x100,
    };

    fn built() -> Gdt {
        let mut gdt = Gdt::new();
        gdt.build(&TARGETS);
        gdt
    }

    #[test]
    fn flat_segments_span_four_gib() {
        let gdt = built();
        for (sel, dpl, ty) in [
            (R0_CODE, Dpl::Ring0, DescriptorType::CODE),
            (R0_DATA, Dpl::Ring0, DescriptorType::DATA),
            (R3_CODE, Dpl::Ring3, DescriptorType::CODE),
            (R3_DATA, Dpl::Ring3, DescriptorType::DATA),
        ] {
            let d = gdt.entry(sel);
            assert_eq!(d.base(), 0);
            assert_eq!(d.byte_limit(), 0xFFFF_FFFF);
            assert!(d.granularity() && d.default_big() && d.present());
            assert_eq!(d.dpl(), dpl);
            assert_eq!(d.descriptor_type(), ty);
        }
    }

    #[test]
    fn per_processor_entries_point_at_their_structures() {
        let gdt = built();
        let tss = gdt.entry(SYS_TSS);
        assert_eq!(tss.base(), TARGETS.tss);
        assert_eq!(tss.byte_limit(), 0x20AB);
        assert_eq!(tss.descriptor_type(), DescriptorType::TSS_32);
        assert!(!tss.default_big());

        let pb = gdt.entry(R0_PB);
        assert_eq!(pb.base(), TARGETS.processor_block);
        assert_eq!(pb.byte_limit(), 0x100);

        let alias = gdt.entry(ALIAS);
        assert_eq!(alias.base(), TARGETS.gdt);
        assert_eq!(alias.byte_limit(), 0x3FF);
    }

    #[test]
    fn fixed_entries() {
        let gdt = built();
        assert_eq!(gdt.entry(NULL).into_bits(), 0);
        assert!(!gdt.entry(R0_LDT).present());
        assert_eq!(gdt.entry(VDM_TILE).base(), 0x400);
        assert_eq!(gdt.entry(VDM_TILE).dpl(), Dpl::Ring3);
        assert_eq!(gdt.entry(VDBS).base(), 0xB_8000);
        assert_eq!(gdt.entry(VDBS).byte_limit(), 0x3FFF);
        assert_eq!(gdt.entry(R3_TEB).descriptor_type().into_bits(), 0x13);
        assert_eq!(gdt.entry(NMI_TSS).descriptor_type(), DescriptorType::CODE);
        assert_eq!(gdt.entry(DF_TSS).base(), 0x2_0000);
        // Slot 12 and everything past ALIAS stay null.
        assert_eq!(gdt.entries()[12].into_bits(), 0);
        assert!(gdt.entries()[15..].iter().all(|d| d.into_bits() == 0));
    }

    #[test]
    fn task_segment_rewrite_keeps_placeholder_flags() {
        let mut gdt = built();
        gdt.describe_task_segment(NMI_TSS, 0x8010_0000, 0x20AC);
        let d = gdt.entry(NMI_TSS);
        assert_eq!(d.base(), 0x8010_0000);
        assert_eq!(d.byte_limit(), 0x20AB);
        assert_eq!(d.descriptor_type(), DescriptorType::TSS_32);
        assert!(d.present() && !d.granularity());
    }

    #[test]
    fn double_fault_placeholder_becomes_a_task_segment() {
        let mut gdt = built();
        let placeholder = gdt.entry(DF_TSS);
        gdt.describe_task_segment(DF_TSS, 0x8011_0000, 0x20AC);
        let d = gdt.entry(DF_TSS);
        assert_eq!(d.base(), 0x8011_0000);
        assert_eq!(d.byte_limit(), 0x20AB);
        assert_eq!(d.descriptor_type(), DescriptorType::TSS_32);
        assert_eq!(d.dpl(), Dpl::Ring0);
        assert!(d.present());
        assert_eq!(d.granularity(), placeholder.granularity());
        assert_eq!(d.default_big(), placeholder.default_big());
    }

    #[test]
    fn base_patch_leaves_the_limit() {
        let mut gdt = built();
        gdt.set_base(R0_PB, 0x1234_5678);
        assert_eq!(gdt.entry(R0_PB).base(), 0x1234_5678);
        assert_eq!(gdt.entry(R0_PB).byte_limit(), 0x100);
    }
}
