//! Descriptor tables used while the processor runs in root mode.

use crate::vmx::{data::host_stack::HostTss, HOST_GDT_DESCRIPTOR_COUNT, HOST_IDT_DESCRIPTOR_COUNT};
use x86::{
    bits64::segmentation::Descriptor64,
    segmentation::{
        BuildDescriptor, CodeSegmentType, Descriptor, DescriptorBuilder, GateDescriptorBuilder,
        SegmentDescriptorBuilder, SegmentSelector,
    },
    Ring,
};

const_assert_eq!(core::mem::size_of::<Descriptor64>(), 16);

/// Present, DPL 0 interrupt gate that jumps to `handler` through `selector`.
pub fn interrupt_gate(handler: u64, selector: SegmentSelector, ist: u8) -> Descriptor64 {
    <DescriptorBuilder as GateDescriptorBuilder<u64>>::interrupt_descriptor(selector, handler)
        .present()
        .dpl(Ring::Ring0)
        .ist(ist)
        .finish()
}

/// The two quadwords a 16-byte system descriptor occupies in a table.
pub fn quadwords(descriptor: Descriptor64) -> [u64; 2] {
    // Both types are 16 bytes without padding.
    //
    unsafe { core::mem::transmute::<Descriptor64, [u64; 2]>(descriptor) }
}

/// Builds the host IDT and GDT. Implemented by the driver, which owns the
/// root mode interrupt handlers.
pub trait HostTables {
    /// Fills every gate of the host interrupt descriptor table.
    fn prepare_host_idt(&self, idt: &mut [Descriptor64; HOST_IDT_DESCRIPTOR_COUNT]);

    /// Fills the host GDT: null descriptor, 64-bit ring 0 code segment and a
    /// TSS descriptor for `tss_address` that spans the last two slots.
    fn prepare_host_gdt(&self, gdt: &mut [u64; HOST_GDT_DESCRIPTOR_COUNT], tss_address: u64) {
        let code: Descriptor =
            <DescriptorBuilder as SegmentDescriptorBuilder<u32>>::code_descriptor(
                0,
                0,
                CodeSegmentType::ExecuteReadAccessed,
            )
            .present()
            .dpl(Ring::Ring0)
            .l()
            .finish();

        let tss: Descriptor64 = <DescriptorBuilder as GateDescriptorBuilder<u64>>::tss_descriptor(
            tss_address,
            HostTss::limit() as u64,
            true,
        )
        .present()
        .dpl(Ring::Ring0)
        .finish();
        let [tss_low, tss_high] = quadwords(tss);

        *gdt = [0, code.as_u64(), tss_low, tss_high];
    }
}
