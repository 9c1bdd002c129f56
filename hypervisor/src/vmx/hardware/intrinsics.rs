use super::Hardware;
use core::arch::asm;
use x86::{
    bits64::vmx as instructions,
    controlregs::cr3,
    cpuid::{cpuid, CpuIdResult},
    dtables::{self, DescriptorTablePointer},
    msr::rdmsr,
    vmx,
};
use x86_64::{
    instructions::interrupts,
    registers::{
        control::{Cr0, Cr4},
        rflags,
    },
};

/// Maps a virtual address of non-paged storage to its physical address.
pub type AddressTranslator = fn(u64) -> u64;

/// Fills in guest RIP/RSP and executes `vmlaunch`. Returns `false` if the
/// launch failed.
pub type LaunchTrampoline = unsafe extern "C" fn() -> bool;

/// Saves the guest registers, calls the exit dispatcher and resumes the guest.
pub type ExitTrampoline = unsafe extern "C" fn();

/// Executes the real instructions on the current processor.
///
/// Address translation and the two trampolines belong to the surrounding
/// driver, so they are passed in.
#[derive(Clone, Copy)]
pub struct Intrinsics {
    pub translate: AddressTranslator,
    pub launch: LaunchTrampoline,
    pub exit: ExitTrampoline,
}

impl Intrinsics {
    pub const fn new(
        translate: AddressTranslator, launch: LaunchTrampoline, exit: ExitTrampoline,
    ) -> Self {
        Self {
            translate,
            launch,
            exit,
        }
    }
}

/// Descriptor for `invept`. The EPT pointer is ignored for the all-context
/// type and the second quadword is reserved.
#[allow(dead_code)]
#[repr(C, align(16))]
struct InveptDescriptor {
    eptp: u64,
    reserved: u64,
}

const INVEPT_ALL_CONTEXT: u64 = 2;

impl Hardware for Intrinsics {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuIdResult {
        cpuid!(leaf, subleaf)
    }

    fn read_cr0(&self) -> u64 {
        Cr0::read_raw()
    }

    fn write_cr0(&mut self, value: u64) {
        unsafe { Cr0::write_raw(value) };
    }

    fn read_cr3(&self) -> u64 {
        unsafe { cr3() }
    }

    fn read_cr4(&self) -> u64 {
        Cr4::read_raw()
    }

    fn write_cr4(&mut self, value: u64) {
        unsafe { Cr4::write_raw(value) };
    }

    fn read_dr7(&self) -> u64 {
        let value: u64;
        unsafe { asm!("mov {}, dr7", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn read_rflags(&self) -> u64 {
        rflags::read_raw()
    }

    fn read_msr(&self, msr: u32) -> u64 {
        unsafe { rdmsr(msr) }
    }

    fn disable_interrupts(&mut self) {
        interrupts::disable();
    }

    fn enable_interrupts(&mut self) {
        interrupts::enable();
    }

    fn sgdt(&self) -> DescriptorTablePointer<u64> {
        let mut gdtr = DescriptorTablePointer::default();
        unsafe { dtables::sgdt(&mut gdtr) };
        gdtr
    }

    fn sidt(&self) -> DescriptorTablePointer<u64> {
        let mut idtr = DescriptorTablePointer::default();
        unsafe { dtables::sidt(&mut idtr) };
        idtr
    }

    fn read_gdt_entry(&self, base: u64, index: u16) -> u64 {
        unsafe { core::ptr::read_unaligned((base as *const u64).add(index as usize)) }
    }

    fn vmxon(&mut self, vmxon_pa: u64) -> vmx::Result<()> {
        unsafe { instructions::vmxon(vmxon_pa) }
    }

    fn vmxoff(&mut self) -> vmx::Result<()> {
        unsafe { instructions::vmxoff() }
    }

    fn vmclear(&mut self, vmcs_pa: u64) -> vmx::Result<()> {
        unsafe { instructions::vmclear(vmcs_pa) }
    }

    fn vmptrld(&mut self, vmcs_pa: u64) -> vmx::Result<()> {
        unsafe { instructions::vmptrld(vmcs_pa) }
    }

    fn vmread(&self, field: u32) -> vmx::Result<u64> {
        unsafe { instructions::vmread(field) }
    }

    fn vmwrite(&mut self, field: u32, value: u64) -> vmx::Result<()> {
        unsafe { instructions::vmwrite(field, value) }
    }

    fn invept_all_context(&mut self) {
        let descriptor = InveptDescriptor {
            eptp: 0,
            reserved: 0,
        };

        unsafe {
            asm!(
                "invept {}, [{}]",
                in(reg) INVEPT_ALL_CONTEXT,
                in(reg) &descriptor,
                options(nostack)
            )
        };
    }

    fn physical_address(&self, va: u64) -> u64 {
        (self.translate)(va)
    }

    fn vm_launch(&mut self) -> bool {
        unsafe { (self.launch)() }
    }

    fn vm_exit_entry(&self) -> u64 {
        self.exit as usize as u64
    }
}
