pub mod context;
pub mod data;
pub mod hardware;
pub mod msr;
pub mod segmentation;
pub mod support;
pub mod tables;
pub mod vcpu;
pub mod vmcs;
pub mod vmexit;

pub use context::{GuestContext, TrapFrame};
pub use hardware::Hardware;
pub use tables::HostTables;
pub use vcpu::Vcpu;
pub use vmexit::{handle_vm_exit, interrupt::handle_host_interrupt, VmExitHandlers};

use x86::{segmentation::SegmentSelector, Ring};

pub const HOST_STACK_SIZE: usize = 0x6000;
pub const HOST_IDT_DESCRIPTOR_COUNT: usize = 256;
pub const HOST_GDT_DESCRIPTOR_COUNT: usize = 4;

pub const HOST_CS_SELECTOR: SegmentSelector = SegmentSelector::new(1, Ring::Ring0);
pub const HOST_TR_SELECTOR: SegmentSelector = SegmentSelector::new(2, Ring::Ring0);

// Selectors of the guest segment registers. These are not read from the
// segment registers but assumed to match the layout of the 64-bit Windows
// GDT.
//
// TODO: Read the live selectors once the guest can be started from a context
// with a different GDT layout.
//
pub const GUEST_CS_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x10);
pub const GUEST_SS_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x18);
pub const GUEST_DS_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x2B);
pub const GUEST_ES_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x2B);
pub const GUEST_FS_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x53);
pub const GUEST_GS_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x2B);
pub const GUEST_TR_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0x40);
pub const GUEST_LDTR_SELECTOR: SegmentSelector = SegmentSelector::from_raw(0);
