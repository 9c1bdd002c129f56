//! Reads base, limit and access rights of a segment from the descriptor table
//! that is currently loaded.

use crate::vmx::hardware::Hardware;
use bitfield::bitfield;
use x86::{dtables::DescriptorTablePointer, segmentation::SegmentSelector};

bitfield! {
    /// A legacy 8-byte segment descriptor.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct SegmentDescriptor(u64);
    impl Debug;

    pub limit_low, set_limit_low: 15, 0;
    pub base_low, set_base_low: 39, 16;
    pub segment_type, set_segment_type: 43, 40;
    pub system, set_system: 44;
    pub dpl, set_dpl: 46, 45;
    pub present, set_present: 47;
    pub limit_high, set_limit_high: 51, 48;
    pub avl, set_avl: 52;
    pub long_mode, set_long_mode: 53;
    pub default_big, set_default_big: 54;
    pub granularity, set_granularity: 55;
    pub base_high, set_base_high: 63, 56;
}
const_assert_eq!(core::mem::size_of::<SegmentDescriptor>(), 8);

impl SegmentDescriptor {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The S flag is clear for system descriptors (LDT, TSS, gates), which
    /// occupy two slots in long mode.
    pub fn is_system(&self) -> bool {
        !self.system()
    }

    pub fn base(&self) -> u64 {
        self.base_low() | (self.base_high() << 24)
    }

    /// Raw 20-bit limit, without the granularity applied.
    pub fn raw_limit(&self) -> u64 {
        self.limit_low() | (self.limit_high() << 16)
    }

    /// Limit in bytes.
    pub fn limit(&self) -> u32 {
        let limit = self.raw_limit() as u32;

        if self.granularity() {
            (limit << 12) | 0xFFF
        } else {
            limit
        }
    }
}

bitfield! {
    /// Segment access rights in the format of the VMCS guest state area.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct SegmentAccessRights(u32);
    impl Debug;

    pub segment_type, set_segment_type: 3, 0;
    pub system, set_system: 4;
    pub dpl, set_dpl: 6, 5;
    pub present, set_present: 7;
    pub avl, set_avl: 12;
    pub long_mode, set_long_mode: 13;
    pub default_big, set_default_big: 14;
    pub granularity, set_granularity: 15;
    pub unusable, set_unusable: 16;
}

impl SegmentAccessRights {
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn new_unusable() -> Self {
        let mut rights = Self(0);
        rights.set_unusable(true);
        rights
    }

    pub fn from_descriptor(descriptor: &SegmentDescriptor) -> Self {
        let mut rights = Self(0);
        rights.set_segment_type(descriptor.segment_type() as u32);
        rights.set_system(descriptor.system());
        rights.set_dpl(descriptor.dpl() as u32);
        rights.set_present(descriptor.present());
        rights.set_avl(descriptor.avl());
        rights.set_long_mode(descriptor.long_mode());
        rights.set_default_big(descriptor.default_big());
        rights.set_granularity(descriptor.granularity());
        rights
    }
}

/// Guest view of a segment register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub selector: u16,
    pub base: u64,
    pub limit: u32,
    pub access_rights: SegmentAccessRights,
}

impl Segment {
    fn unusable(selector: SegmentSelector) -> Self {
        Self {
            selector: selector.bits(),
            base: 0,
            limit: 0,
            access_rights: SegmentAccessRights::new_unusable(),
        }
    }

    /// Walks the descriptor table referenced by `gdtr` for `selector`.
    ///
    /// The RPL and TI bits are ignored, every selector is treated as a GDT
    /// selector. The null selector and selectors beyond the table limit give
    /// an unusable segment.
    pub fn from_selector<H: Hardware>(
        hw: &H, gdtr: &DescriptorTablePointer<u64>, selector: SegmentSelector,
    ) -> Self {
        let index = selector.index();
        let base = gdtr.base as u64;
        let limit = gdtr.limit;

        if index == 0 || !slot_in_limit(limit, index) {
            return Self::unusable(selector);
        }

        let descriptor = SegmentDescriptor::from_bits(hw.read_gdt_entry(base, index));

        // System descriptors take up the following slot as well.
        //
        let mut segment_base = descriptor.base();
        if descriptor.is_system() {
            if !slot_in_limit(limit, index + 1) {
                return Self::unusable(selector);
            }

            segment_base |= hw.read_gdt_entry(base, index + 1) << 32;
        }

        Self {
            selector: selector.bits(),
            base: segment_base,
            limit: descriptor.limit(),
            access_rights: SegmentAccessRights::from_descriptor(&descriptor),
        }
    }
}

fn slot_in_limit(limit: u16, index: u16) -> bool {
    index as u32 * 8 + 7 <= limit as u32
}
