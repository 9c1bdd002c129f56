//! Host-state area: the processor state loaded on every vm-exit.

use crate::{
    error::HypervisorError,
    vmx::{hardware::Hardware, vmcs::vmwrite, HOST_CS_SELECTOR, HOST_TR_SELECTOR},
};
use x86::vmx::vmcs::host;

/// Linear addresses of the host structures owned by the vcpu.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostLayout {
    pub stack_top: u64,
    pub tss: u64,
    pub gdt: u64,
    pub idt: u64,
}

pub fn write_host_fields<H: Hardware>(
    hw: &mut H, layout: &HostLayout,
) -> Result<(), HypervisorError> {
    // TODO: Build hypervisor owned CR0/CR3/CR4 instead of inheriting the ones
    // of the virtualized context.
    //
    let cr0 = hw.read_cr0();
    let cr3 = hw.read_cr3();
    let cr4 = hw.read_cr4();
    vmwrite(hw, host::CR0, cr0)?;
    vmwrite(hw, host::CR3, cr3)?;
    vmwrite(hw, host::CR4, cr4)?;

    let exit_entry = hw.vm_exit_entry();
    vmwrite(hw, host::RSP, layout.stack_top)?;
    vmwrite(hw, host::RIP, exit_entry)?;

    // Root mode never uses SS, DS, ES, FS or GS for memory accesses.
    //
    vmwrite(hw, host::CS_SELECTOR, HOST_CS_SELECTOR.bits())?;
    vmwrite(hw, host::SS_SELECTOR, 0u16)?;
    vmwrite(hw, host::DS_SELECTOR, 0u16)?;
    vmwrite(hw, host::ES_SELECTOR, 0u16)?;
    vmwrite(hw, host::FS_SELECTOR, 0u16)?;
    vmwrite(hw, host::GS_SELECTOR, 0u16)?;
    vmwrite(hw, host::TR_SELECTOR, HOST_TR_SELECTOR.bits())?;

    vmwrite(hw, host::FS_BASE, 0u64)?;
    vmwrite(hw, host::GS_BASE, 0u64)?;
    vmwrite(hw, host::TR_BASE, layout.tss)?;
    vmwrite(hw, host::GDTR_BASE, layout.gdt)?;
    vmwrite(hw, host::IDTR_BASE, layout.idt)?;

    vmwrite(hw, host::IA32_SYSENTER_CS, 0u32)?;
    vmwrite(hw, host::IA32_SYSENTER_ESP, 0u64)?;
    vmwrite(hw, host::IA32_SYSENTER_EIP, 0u64)?;

    Ok(())
}
