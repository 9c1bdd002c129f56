use crate::vmx::hardware::Hardware;
use bitfield::bitfield;
use x86::msr::{IA32_FEATURE_CONTROL, IA32_VMX_BASIC};

/// CR4.VMXE: VMX operation is enabled.
pub const CR4_VMX_ENABLE: u64 = 1 << 13;

bitfield! {
    /// `IA32_FEATURE_CONTROL` (0x3A).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct FeatureControl(u64);
    impl Debug;

    pub lock, set_lock: 0;
    pub vmx_inside_smx, set_vmx_inside_smx: 1;
    pub vmx_outside_smx, set_vmx_outside_smx: 2;
}

impl FeatureControl {
    pub fn read<H: Hardware>(hw: &H) -> Self {
        Self(hw.read_msr(IA32_FEATURE_CONTROL))
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// VMXON is only legal when the firmware locked the register with VMX
    /// enabled outside of SMX operation.
    pub fn allows_vmxon(&self) -> bool {
        self.lock() && self.vmx_outside_smx()
    }
}

bitfield! {
    /// `IA32_VMX_BASIC` (0x480).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct VmxBasic(u64);
    impl Debug;

    pub u32, revision_id, _: 30, 0;
    pub u16, region_size, _: 44, 32;
    pub physical_address_width_32, _: 48;
    pub dual_monitor_smm, _: 49;
    pub u8, memory_type, _: 53, 50;
    pub ins_outs_reporting, _: 54;
    pub true_controls, _: 55;
}

impl VmxBasic {
    pub fn read<H: Hardware>(hw: &H) -> Self {
        Self(hw.read_msr(IA32_VMX_BASIC))
    }
}
