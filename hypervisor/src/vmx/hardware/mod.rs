//! Every access to privileged processor state goes through [`Hardware`].
//!
//! The virtualization code itself never executes a privileged instruction
//! directly, which keeps it usable on the development host with the fake
//! implementation used by the tests.

use x86::{cpuid::CpuIdResult, dtables::DescriptorTablePointer, vmx};

#[cfg(target_arch = "x86_64")]
pub mod intrinsics;

#[cfg(test)]
pub mod fake;

pub trait Hardware {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuIdResult;

    fn read_cr0(&self) -> u64;
    fn write_cr0(&mut self, value: u64);
    fn read_cr3(&self) -> u64;
    fn read_cr4(&self) -> u64;
    fn write_cr4(&mut self, value: u64);
    fn read_dr7(&self) -> u64;
    fn read_rflags(&self) -> u64;

    fn read_msr(&self, msr: u32) -> u64;

    fn disable_interrupts(&mut self);
    fn enable_interrupts(&mut self);

    fn sgdt(&self) -> DescriptorTablePointer<u64>;
    fn sidt(&self) -> DescriptorTablePointer<u64>;

    /// Reads the 8-byte slot `index` of the descriptor table located at `base`.
    fn read_gdt_entry(&self, base: u64, index: u16) -> u64;

    fn vmxon(&mut self, vmxon_pa: u64) -> vmx::Result<()>;
    fn vmxoff(&mut self) -> vmx::Result<()>;
    fn vmclear(&mut self, vmcs_pa: u64) -> vmx::Result<()>;
    fn vmptrld(&mut self, vmcs_pa: u64) -> vmx::Result<()>;
    fn vmread(&self, field: u32) -> vmx::Result<u64>;
    fn vmwrite(&mut self, field: u32, value: u64) -> vmx::Result<()>;

    /// Invalidates the cached EPT translations of every context.
    fn invept_all_context(&mut self);

    fn physical_address(&self, va: u64) -> u64;

    /// Calls the external launch trampoline. It fills in guest RIP/RSP and
    /// executes `vmlaunch`. Only returns if the launch failed, or as the guest
    /// once the launch succeeded.
    fn vm_launch(&mut self) -> bool;

    /// Address of the external vm-exit trampoline, installed as host RIP.
    fn vm_exit_entry(&self) -> u64;
}
