use crate::{
    error::HypervisorError,
    utils::addresses::{page_aligned_physical_address, physical_address, virtual_address},
    vmx::{
        data::{
            host_stack::{HostStack, HostTss},
            msr_bitmap::MsrBitmap,
            region::{VmcsRegion, VmxonRegion},
        },
        hardware::Hardware,
        msr::{VmxBasic, CR4_VMX_ENABLE},
        support,
        tables::HostTables,
        vmcs::{
            controls::write_control_fields,
            guest::write_guest_fields,
            host::{write_host_fields, HostLayout},
        },
        HOST_GDT_DESCRIPTOR_COUNT, HOST_IDT_DESCRIPTOR_COUNT,
    },
};
use x86::{
    bits64::segmentation::Descriptor64,
    msr::{IA32_VMX_CR0_FIXED0, IA32_VMX_CR0_FIXED1, IA32_VMX_CR4_FIXED0, IA32_VMX_CR4_FIXED1},
    vmx::vmcs::ro,
};

/// Everything one processor needs to run in VMX operation.
///
/// The processor references most of the members by physical address, so the
/// object must not move once [`Vcpu::virtualize`] has been called. It has to
/// be allocated in non-paged memory that is physically contiguous per page.
#[repr(C, align(4096))]
pub struct Vcpu {
    vmxon: VmxonRegion,
    vmcs: VmcsRegion,
    msr_bitmap: MsrBitmap,
    host_stack: HostStack,
    host_tss: HostTss,
    host_idt: [Descriptor64; HOST_IDT_DESCRIPTOR_COUNT],
    host_gdt: [u64; HOST_GDT_DESCRIPTOR_COUNT],

    /// The index of the processor.
    index: u32,
}

impl Vcpu {
    pub const fn new(index: u32) -> Self {
        Self {
            vmxon: VmxonRegion::new(),
            vmcs: VmcsRegion::new(),
            msr_bitmap: MsrBitmap::new(),
            host_stack: HostStack::new(),
            host_tss: HostTss::new(),
            host_idt: [Descriptor64::NULL; HOST_IDT_DESCRIPTOR_COUNT],
            host_gdt: [0; HOST_GDT_DESCRIPTOR_COUNT],
            index,
        }
    }

    /// Virtualizes the current processor. Must be called on the processor
    /// with index `self.index`.
    ///
    /// Returns `true` in the guest once the launch succeeded. On failure the
    /// processor is left outside of VMX operation.
    pub fn virtualize<H: Hardware, T: HostTables>(&mut self, hw: &mut H, tables: &T) -> bool {
        log::info!("Virtualizing processor {}", self.index);

        if !self.enable_vmx_operation(hw) {
            log::error!("Failed to enable vmx operation on processor {}", self.index);
            return false;
        }

        if !self.enter_vmx_operation(hw) {
            return false;
        }

        // VMX operation has been entered. Every failure from here on must
        // leave it again before returning.
        //
        if !self.launch(hw, tables) {
            self.leave_vmx_operation(hw);
            return false;
        }

        log::info!("Processor {} has been virtualized", self.index);

        true
    }

    fn launch<H: Hardware, T: HostTables>(&mut self, hw: &mut H, tables: &T) -> bool {
        if !self.set_vmcs_pointer(hw) {
            return false;
        }

        self.prepare_external_structures(tables);

        if let Err(error) = self.write_vmcs_fields(hw) {
            log::error!("Failed to set up the vmcs: {}", error);
            return false;
        }

        log::info!("Launching vm");
        if !hw.vm_launch() {
            match hw.vmread(ro::VM_INSTRUCTION_ERROR) {
                Ok(error) => log::error!("vmlaunch failed with instruction error {}", error),
                Err(error) => log::error!("vmlaunch failed ({:?})", error),
            }

            return false;
        }

        true
    }

    /// Leaves VMX operation. Has to be called in root mode, e.g. from the
    /// vm-exit handler that unloads the hypervisor.
    pub fn devirtualize<H: Hardware>(&mut self, hw: &mut H) -> bool {
        if let Err(error) = hw.vmxoff() {
            log::error!("vmxoff failed on processor {}: {:?}", self.index, error);
            return false;
        }

        log::info!("Processor {} has been devirtualized", self.index);

        true
    }

    /// Checks the processor capabilities and sets up CR0 and CR4 for VMX
    /// operation.
    pub fn enable_vmx_operation<H: Hardware>(&self, hw: &mut H) -> bool {
        if !support::is_vmx_supported(hw) {
            return false;
        }

        // Nothing may observe a half updated CR0/CR4 pair.
        //
        hw.disable_interrupts();

        let mut cr0 = hw.read_cr0();
        let mut cr4 = hw.read_cr4() | CR4_VMX_ENABLE;

        cr0 |= hw.read_msr(IA32_VMX_CR0_FIXED0);
        cr0 &= hw.read_msr(IA32_VMX_CR0_FIXED1);
        cr4 |= hw.read_msr(IA32_VMX_CR4_FIXED0);
        cr4 &= hw.read_msr(IA32_VMX_CR4_FIXED1);

        hw.write_cr0(cr0);
        hw.write_cr4(cr4);

        hw.enable_interrupts();

        log::info!("Enabled vmx operation (cr0: {:#x}, cr4: {:#x})", cr0, cr4);

        true
    }

    /// Executes `vmxon` on the VMXON region.
    pub fn enter_vmx_operation<H: Hardware>(&mut self, hw: &mut H) -> bool {
        let revision_id = VmxBasic::read(hw).revision_id();
        self.vmxon.stamp(revision_id);

        let vmxon_pa = page_aligned_physical_address(hw, &self.vmxon, "vmxon region");
        if let Err(error) = hw.vmxon(vmxon_pa) {
            log::error!("vmxon failed: {:?}", error);
            return false;
        }

        // Stale translations of a previous user of VMX operation must not be
        // used.
        //
        hw.invept_all_context();

        log::info!("Entered vmx operation");

        true
    }

    /// Clears the VMCS and makes it the current VMCS of this processor.
    pub fn set_vmcs_pointer<H: Hardware>(&mut self, hw: &mut H) -> bool {
        let revision_id = VmxBasic::read(hw).revision_id();
        self.vmcs.stamp(revision_id);

        let vmcs_pa = page_aligned_physical_address(hw, &self.vmcs, "vmcs");

        if let Err(error) = hw.vmclear(vmcs_pa) {
            log::error!("vmclear failed: {:?}", error);
            return false;
        }

        if let Err(error) = hw.vmptrld(vmcs_pa) {
            log::error!("vmptrld failed: {:?}", error);
            return false;
        }

        true
    }

    /// Resets the MSR bitmap and the TSS and builds the host IDT and GDT.
    pub fn prepare_external_structures<T: HostTables>(&mut self, tables: &T) {
        self.msr_bitmap.clear();
        self.host_tss.clear();

        tables.prepare_host_idt(&mut self.host_idt);
        tables.prepare_host_gdt(&mut self.host_gdt, virtual_address(&self.host_tss.segment));
    }

    fn write_vmcs_fields<H: Hardware>(&self, hw: &mut H) -> Result<(), HypervisorError> {
        self.write_vmcs_ctrl_fields(hw)?;
        self.write_vmcs_host_fields(hw)?;
        self.write_vmcs_guest_fields(hw)
    }

    pub fn write_vmcs_ctrl_fields<H: Hardware>(&self, hw: &mut H) -> Result<(), HypervisorError> {
        let msr_bitmap_pa = page_aligned_physical_address(hw, &self.msr_bitmap, "msr bitmap");

        write_control_fields(hw, msr_bitmap_pa)
    }

    pub fn write_vmcs_host_fields<H: Hardware>(&self, hw: &mut H) -> Result<(), HypervisorError> {
        let layout = HostLayout {
            stack_top: HostStack::top(virtual_address(&self.host_stack)),
            tss: virtual_address(&self.host_tss.segment),
            gdt: virtual_address(&self.host_gdt),
            idt: virtual_address(&self.host_idt),
        };

        write_host_fields(hw, &layout)
    }

    pub fn write_vmcs_guest_fields<H: Hardware>(&self, hw: &mut H) -> Result<(), HypervisorError> {
        write_guest_fields(hw)
    }

    fn leave_vmx_operation<H: Hardware>(&self, hw: &mut H) {
        match hw.vmxoff() {
            Ok(()) => log::info!("Left vmx operation on processor {}", self.index),
            Err(error) => log::error!("vmxoff failed: {:?}", error),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn vmxon_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.vmxon)
    }

    pub fn vmcs_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.vmcs)
    }

    pub fn msr_bitmap_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.msr_bitmap)
    }

    pub fn host_stack_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.host_stack)
    }

    pub fn host_tss_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.host_tss)
    }

    pub fn host_idt_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.host_idt)
    }

    pub fn host_gdt_address<H: Hardware>(&self, hw: &H) -> u64 {
        physical_address(hw, &self.host_gdt)
    }

    pub fn msr_bitmap_mut(&mut self) -> &mut MsrBitmap {
        &mut self.msr_bitmap
    }
}
