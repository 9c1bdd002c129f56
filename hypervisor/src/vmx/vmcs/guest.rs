//! Guest-state area: the state of the context that keeps running as guest.

use crate::{
    error::HypervisorError,
    vmx::{
        hardware::Hardware,
        segmentation::Segment,
        vmcs::vmwrite,
        GUEST_CS_SELECTOR, GUEST_DS_SELECTOR, GUEST_ES_SELECTOR, GUEST_FS_SELECTOR,
        GUEST_GS_SELECTOR, GUEST_LDTR_SELECTOR, GUEST_SS_SELECTOR, GUEST_TR_SELECTOR,
    },
};
use x86::{msr, vmx::vmcs::guest};

/// VMCS fields of one guest segment register.
struct SegmentFields {
    selector: u32,
    base: u32,
    limit: u32,
    access_rights: u32,
}

const ES: SegmentFields = SegmentFields {
    selector: guest::ES_SELECTOR,
    base: guest::ES_BASE,
    limit: guest::ES_LIMIT,
    access_rights: guest::ES_ACCESS_RIGHTS,
};

const CS: SegmentFields = SegmentFields {
    selector: guest::CS_SELECTOR,
    base: guest::CS_BASE,
    limit: guest::CS_LIMIT,
    access_rights: guest::CS_ACCESS_RIGHTS,
};

const SS: SegmentFields = SegmentFields {
    selector: guest::SS_SELECTOR,
    base: guest::SS_BASE,
    limit: guest::SS_LIMIT,
    access_rights: guest::SS_ACCESS_RIGHTS,
};

const DS: SegmentFields = SegmentFields {
    selector: guest::DS_SELECTOR,
    base: guest::DS_BASE,
    limit: guest::DS_LIMIT,
    access_rights: guest::DS_ACCESS_RIGHTS,
};

const FS: SegmentFields = SegmentFields {
    selector: guest::FS_SELECTOR,
    base: guest::FS_BASE,
    limit: guest::FS_LIMIT,
    access_rights: guest::FS_ACCESS_RIGHTS,
};

const GS: SegmentFields = SegmentFields {
    selector: guest::GS_SELECTOR,
    base: guest::GS_BASE,
    limit: guest::GS_LIMIT,
    access_rights: guest::GS_ACCESS_RIGHTS,
};

const LDTR: SegmentFields = SegmentFields {
    selector: guest::LDTR_SELECTOR,
    base: guest::LDTR_BASE,
    limit: guest::LDTR_LIMIT,
    access_rights: guest::LDTR_ACCESS_RIGHTS,
};

const TR: SegmentFields = SegmentFields {
    selector: guest::TR_SELECTOR,
    base: guest::TR_BASE,
    limit: guest::TR_LIMIT,
    access_rights: guest::TR_ACCESS_RIGHTS,
};

fn write_segment<H: Hardware>(
    hw: &mut H, fields: &SegmentFields, segment: &Segment,
) -> Result<(), HypervisorError> {
    vmwrite(hw, fields.selector, segment.selector)?;
    vmwrite(hw, fields.base, segment.base)?;
    vmwrite(hw, fields.limit, segment.limit)?;
    vmwrite(hw, fields.access_rights, segment.access_rights.bits())
}

/// Captures the current context as initial guest state.
///
/// Guest RSP and RIP are written by the launch trampoline right before
/// `vmlaunch`, so execution resumes where it requested virtualization.
pub fn write_guest_fields<H: Hardware>(hw: &mut H) -> Result<(), HypervisorError> {
    let cr0 = hw.read_cr0();
    let cr3 = hw.read_cr3();
    let cr4 = hw.read_cr4();
    let dr7 = hw.read_dr7();
    let rflags = hw.read_rflags();
    vmwrite(hw, guest::CR0, cr0)?;
    vmwrite(hw, guest::CR3, cr3)?;
    vmwrite(hw, guest::CR4, cr4)?;
    vmwrite(hw, guest::DR7, dr7)?;
    vmwrite(hw, guest::RFLAGS, rflags)?;

    vmwrite(hw, guest::RSP, 0u64)?;
    vmwrite(hw, guest::RIP, 0u64)?;

    // The selectors are assumed, not read from the segment registers. See
    // `GUEST_CS_SELECTOR`.
    //
    let gdtr = hw.sgdt();
    let segment = |selector| Segment::from_selector(&*hw, &gdtr, selector);
    let cs = segment(GUEST_CS_SELECTOR);
    let ss = segment(GUEST_SS_SELECTOR);
    let ds = segment(GUEST_DS_SELECTOR);
    let es = segment(GUEST_ES_SELECTOR);
    let mut fs = segment(GUEST_FS_SELECTOR);
    let mut gs = segment(GUEST_GS_SELECTOR);
    let tr = segment(GUEST_TR_SELECTOR);
    let ldtr = segment(GUEST_LDTR_SELECTOR);

    // In long mode the FS and GS bases come from the MSRs, not the GDT.
    //
    fs.base = hw.read_msr(msr::IA32_FS_BASE);
    gs.base = hw.read_msr(msr::IA32_GS_BASE);

    write_segment(hw, &CS, &cs)?;
    write_segment(hw, &SS, &ss)?;
    write_segment(hw, &DS, &ds)?;
    write_segment(hw, &ES, &es)?;
    write_segment(hw, &FS, &fs)?;
    write_segment(hw, &GS, &gs)?;
    write_segment(hw, &TR, &tr)?;
    write_segment(hw, &LDTR, &ldtr)?;

    let idtr = hw.sidt();
    let (gdt_base, gdt_limit) = (gdtr.base as u64, gdtr.limit);
    let (idt_base, idt_limit) = (idtr.base as u64, idtr.limit);
    vmwrite(hw, guest::GDTR_BASE, gdt_base)?;
    vmwrite(hw, guest::GDTR_LIMIT, gdt_limit)?;
    vmwrite(hw, guest::IDTR_BASE, idt_base)?;
    vmwrite(hw, guest::IDTR_LIMIT, idt_limit)?;

    let debugctl = hw.read_msr(msr::IA32_DEBUGCTL);
    let sysenter_cs = hw.read_msr(msr::IA32_SYSENTER_CS);
    let sysenter_esp = hw.read_msr(msr::IA32_SYSENTER_ESP);
    let sysenter_eip = hw.read_msr(msr::IA32_SYSENTER_EIP);
    vmwrite(hw, guest::IA32_DEBUGCTL_FULL, debugctl)?;
    vmwrite(hw, guest::IA32_SYSENTER_CS, sysenter_cs)?;
    vmwrite(hw, guest::IA32_SYSENTER_ESP, sysenter_esp)?;
    vmwrite(hw, guest::IA32_SYSENTER_EIP, sysenter_eip)?;

    // Active, not blocked by anything, no shadow VMCS.
    //
    vmwrite(hw, guest::ACTIVITY_STATE, 0u32)?;
    vmwrite(hw, guest::INTERRUPTIBILITY_STATE, 0u32)?;
    vmwrite(hw, guest::PENDING_DBG_EXCEPTIONS, 0u64)?;
    vmwrite(hw, guest::LINK_PTR_FULL, u64::MAX)?;

    Ok(())
}
