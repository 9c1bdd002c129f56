//! Software model of the VMX instructions used by the tests.
//!
//! Address translation is an identity mapping plus `physical_offset`, so the
//! fake can look at the revision identifier that is actually stored in a
//! region when VMXON, VMCLEAR or VMPTRLD is executed on it.

use super::Hardware;
use std::collections::BTreeMap;
use x86::{
    cpuid::CpuIdResult,
    dtables::DescriptorTablePointer,
    msr,
    vmx::{self, vmcs, VmFail},
};

pub const VMX_REVISION: u32 = 0x4;

/// `IA32_VMX_BASIC` of a typical processor: revision 4, 4 KiB regions,
/// write-back memory type and the "true" control MSRs.
pub const VMX_BASIC: u64 = 0x00da_0400_0000_0000 | VMX_REVISION as u64;

pub const CR0_FIXED0: u64 = 0x8000_0021;
pub const CR0_FIXED1: u64 = 0xffff_ffff;
pub const CR4_FIXED0: u64 = 0x2000;
pub const CR4_FIXED1: u64 = 0x0037_27ff;

/// Protected mode and paging enabled, numeric error reporting (NE) not yet.
pub const INITIAL_CR0: u64 = 0x8005_0011;

/// Includes CET (bit 23), which the fixed-1 mask does not allow.
pub const INITIAL_CR4: u64 = 0x0085_06f8;

pub const INITIAL_CR3: u64 = 0x001a_d000;
pub const INITIAL_DR7: u64 = 0x400;
pub const INITIAL_RFLAGS: u64 = 0x246;

pub const GDT_BASE: u64 = 0xffff_f800_1234_0000;
pub const IDT_BASE: u64 = 0xffff_f800_1235_0000;

/// VM-instruction error reported by a failed launch: "VM entry with invalid
/// control field(s)".
pub const LAUNCH_ERROR: u64 = 7;

const CR4_VMXE: u64 = 1 << 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    WriteCr0(u64),
    WriteCr4(u64),
    DisableInterrupts,
    EnableInterrupts,
    Vmxon { pa: u64, revision: u32 },
    Vmxoff,
    Vmclear { pa: u64, revision: u32 },
    Vmptrld { pa: u64, revision: u32 },
    InveptAllContext,
    Launch,
}

pub struct FakeHardware {
    pub cpuid_ecx: u32,

    pub cr0: u64,
    pub cr3: u64,
    pub cr4: u64,
    pub dr7: u64,
    pub rflags: u64,
    pub msrs: BTreeMap<u32, u64>,
    pub interrupts_enabled: bool,

    pub gdt_base: u64,
    pub gdt_limit: u16,
    pub idt_base: u64,
    pub idt_limit: u16,
    pub gdt: Vec<u64>,

    pub physical_offset: u64,
    pub exit_entry: u64,

    pub vmx_on: bool,
    pub current_vmcs: Option<u64>,
    pub vmcs_fields: BTreeMap<u64, BTreeMap<u32, u64>>,
    /// Every successful vmwrite, in order.
    pub writes: Vec<(u32, u64)>,

    pub fail_vmxon: bool,
    pub fail_vmptrld: bool,
    pub fail_vmwrite_field: Option<u32>,
    pub launch_result: bool,

    pub events: Vec<Event>,
}

impl FakeHardware {
    pub fn new() -> Self {
        let msrs = BTreeMap::from([
            (msr::IA32_FEATURE_CONTROL, 0b101),
            (msr::IA32_VMX_BASIC, VMX_BASIC),
            (msr::IA32_VMX_CR0_FIXED0, CR0_FIXED0),
            (msr::IA32_VMX_CR0_FIXED1, CR0_FIXED1),
            (msr::IA32_VMX_CR4_FIXED0, CR4_FIXED0),
            (msr::IA32_VMX_CR4_FIXED1, CR4_FIXED1),
            (msr::IA32_VMX_TRUE_PINBASED_CTLS, 0x0000_00ff_0000_0016),
            (msr::IA32_VMX_TRUE_PROCBASED_CTLS, 0xfff9_fffe_0400_6172),
            (msr::IA32_VMX_PROCBASED_CTLS2, 0x04ff_ffff_0000_0000),
            (msr::IA32_VMX_TRUE_EXIT_CTLS, 0x01ff_ffff_0003_6dfb),
            (msr::IA32_VMX_TRUE_ENTRY_CTLS, 0x0003_ffff_0000_11fb),
            (msr::IA32_FS_BASE, 0x0000_0000_7ffe_0000),
            (msr::IA32_GS_BASE, 0xffff_f800_0a5b_0000),
            (msr::IA32_DEBUGCTL, 0x1),
            (msr::IA32_SYSENTER_CS, 0x10),
            (msr::IA32_SYSENTER_ESP, 0xffff_f800_0a5c_0000),
            (msr::IA32_SYSENTER_EIP, 0xffff_f800_0a5d_0000),
        ]);

        Self {
            cpuid_ecx: 1 << 5,
            cr0: INITIAL_CR0,
            cr3: INITIAL_CR3,
            cr4: INITIAL_CR4,
            dr7: INITIAL_DR7,
            rflags: INITIAL_RFLAGS,
            msrs,
            interrupts_enabled: true,
            gdt_base: GDT_BASE,
            gdt_limit: 0x7f,
            idt_base: IDT_BASE,
            idt_limit: 0xfff,
            gdt: windows_gdt(),
            physical_offset: 0,
            exit_entry: 0xffff_f800_0dea_d000,
            vmx_on: false,
            current_vmcs: None,
            vmcs_fields: BTreeMap::new(),
            writes: Vec::new(),
            fail_vmxon: false,
            fail_vmptrld: false,
            fail_vmwrite_field: None,
            launch_result: true,
            events: Vec::new(),
        }
    }

    /// Reads a field of the current VMCS without going through `vmread`.
    pub fn field(&self, field: u32) -> Option<u64> {
        let pa = self.current_vmcs?;
        self.vmcs_fields.get(&pa)?.get(&field).copied()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(predicate)
    }

    fn revision_at(&self, pa: u64) -> u32 {
        let va = pa - self.physical_offset;
        unsafe { core::ptr::read(va as *const u32) }
    }
}

impl Default for FakeHardware {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor table as found on 64-bit Windows: kernel code/data at 0x10 and
/// 0x18, user data at 0x28, user TEB at 0x50 and the TSS at 0x40.
fn windows_gdt() -> Vec<u64> {
    let mut gdt = vec![0u64; 16];
    gdt[2] = 0x0020_9b00_0000_0000;
    gdt[3] = 0x00cf_9300_0000_ffff;
    gdt[4] = 0x00cf_fb00_0000_ffff;
    gdt[5] = 0x00cf_f300_0000_ffff;
    gdt[6] = 0x0020_fb00_0000_0000;
    gdt[8] = 0x1a00_8b5e_7000_0067;
    gdt[9] = 0x0000_0000_ffff_f800;
    gdt[10] = 0x0040_f300_0000_3c00;
    gdt
}

impl Hardware for FakeHardware {
    fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuIdResult {
        match leaf {
            1 => CpuIdResult {
                eax: 0x000a_0671,
                ebx: 0,
                ecx: self.cpuid_ecx,
                edx: 0,
            },
            _ => CpuIdResult {
                eax: 0,
                ebx: 0,
                ecx: 0,
                edx: 0,
            },
        }
    }

    fn read_cr0(&self) -> u64 {
        self.cr0
    }

    fn write_cr0(&mut self, value: u64) {
        self.events.push(Event::WriteCr0(value));
        self.cr0 = value;
    }

    fn read_cr3(&self) -> u64 {
        self.cr3
    }

    fn read_cr4(&self) -> u64 {
        self.cr4
    }

    fn write_cr4(&mut self, value: u64) {
        self.events.push(Event::WriteCr4(value));
        self.cr4 = value;
    }

    fn read_dr7(&self) -> u64 {
        self.dr7
    }

    fn read_rflags(&self) -> u64 {
        self.rflags
    }

    fn read_msr(&self, msr: u32) -> u64 {
        self.msrs.get(&msr).copied().unwrap_or(0)
    }

    fn disable_interrupts(&mut self) {
        self.events.push(Event::DisableInterrupts);
        self.interrupts_enabled = false;
    }

    fn enable_interrupts(&mut self) {
        self.events.push(Event::EnableInterrupts);
        self.interrupts_enabled = true;
    }

    fn sgdt(&self) -> DescriptorTablePointer<u64> {
        DescriptorTablePointer {
            limit: self.gdt_limit,
            base: self.gdt_base as *const u64,
        }
    }

    fn sidt(&self) -> DescriptorTablePointer<u64> {
        DescriptorTablePointer {
            limit: self.idt_limit,
            base: self.idt_base as *const u64,
        }
    }

    fn read_gdt_entry(&self, base: u64, index: u16) -> u64 {
        assert_eq!(base, self.gdt_base);
        assert!(
            (index as u32) * 8 + 7 <= self.gdt_limit as u32,
            "slot {} is outside of the gdt",
            index
        );
        self.gdt.get(index as usize).copied().unwrap_or(0)
    }

    fn vmxon(&mut self, vmxon_pa: u64) -> vmx::Result<()> {
        let revision = self.revision_at(vmxon_pa);
        self.events.push(Event::Vmxon {
            pa: vmxon_pa,
            revision,
        });

        if self.fail_vmxon
            || self.vmx_on
            || self.cr4 & CR4_VMXE == 0
            || vmxon_pa % 0x1000 != 0
            || revision != VMX_REVISION
        {
            return Err(VmFail::VmFailInvalid);
        }

        self.vmx_on = true;
        Ok(())
    }

    fn vmxoff(&mut self) -> vmx::Result<()> {
        self.events.push(Event::Vmxoff);

        if !self.vmx_on {
            return Err(VmFail::VmFailInvalid);
        }

        self.vmx_on = false;
        self.current_vmcs = None;
        Ok(())
    }

    fn vmclear(&mut self, vmcs_pa: u64) -> vmx::Result<()> {
        let revision = self.revision_at(vmcs_pa);
        self.events.push(Event::Vmclear {
            pa: vmcs_pa,
            revision,
        });

        if !self.vmx_on || vmcs_pa % 0x1000 != 0 {
            return Err(VmFail::VmFailInvalid);
        }

        if self.current_vmcs == Some(vmcs_pa) {
            self.current_vmcs = None;
        }
        Ok(())
    }

    fn vmptrld(&mut self, vmcs_pa: u64) -> vmx::Result<()> {
        let revision = self.revision_at(vmcs_pa);
        self.events.push(Event::Vmptrld {
            pa: vmcs_pa,
            revision,
        });

        if self.fail_vmptrld || !self.vmx_on || vmcs_pa % 0x1000 != 0 {
            return Err(VmFail::VmFailInvalid);
        }

        // Bit 31 set means shadow VMCS, which needs VMCS shadowing.
        //
        if revision != VMX_REVISION {
            return Err(VmFail::VmFailValid);
        }

        self.current_vmcs = Some(vmcs_pa);
        self.vmcs_fields.entry(vmcs_pa).or_default();
        Ok(())
    }

    fn vmread(&self, field: u32) -> vmx::Result<u64> {
        let Some(pa) = self.current_vmcs else { return Err(VmFail::VmFailInvalid) };

        Ok(self
            .vmcs_fields
            .get(&pa)
            .and_then(|fields| fields.get(&field))
            .copied()
            .unwrap_or(0))
    }

    fn vmwrite(&mut self, field: u32, value: u64) -> vmx::Result<()> {
        let Some(pa) = self.current_vmcs else { return Err(VmFail::VmFailInvalid) };

        if self.fail_vmwrite_field == Some(field) {
            return Err(VmFail::VmFailValid);
        }

        self.vmcs_fields.entry(pa).or_default().insert(field, value);
        self.writes.push((field, value));
        Ok(())
    }

    fn invept_all_context(&mut self) {
        self.events.push(Event::InveptAllContext);
    }

    fn physical_address(&self, va: u64) -> u64 {
        va + self.physical_offset
    }

    fn vm_launch(&mut self) -> bool {
        self.events.push(Event::Launch);

        if !self.launch_result {
            if let Some(pa) = self.current_vmcs {
                self.vmcs_fields
                    .entry(pa)
                    .or_default()
                    .insert(vmcs::ro::VM_INSTRUCTION_ERROR, LAUNCH_ERROR);
            }
        }

        self.launch_result
    }

    fn vm_exit_entry(&self) -> u64 {
        self.exit_entry
    }
}
