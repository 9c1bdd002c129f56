//! Checks whether the current processor is able to run the hypervisor.

use crate::vmx::{hardware::Hardware, msr::FeatureControl};

/// `CPUID.01H:ECX.VMX[bit 5]`
const CPUID_VMX: u32 = 1 << 5;

/// Checks whether vmx is supported by the processor.
///
/// # Recommended Algorithm
/// Taken from section `24.6 Discovering Support for VMX` and `24.7 Enabling
/// and Entering VMX Operation` of the Intel manual.
/// ```pseudocode
/// if (CPUID.1:ECX.VMX[bit 5] == 0)
///     return VMX_NOT_AVAIL;
///
/// if (IA32_FEATURE_CONTROL.Lock == 0 || IA32_FEATURE_CONTROL.EnableVmxOutsideSmx == 0)
///     return VMX_DISABLED_AT_BIOS;
///
/// return VMX_ALLOWED;
/// ```
pub fn is_vmx_supported<H: Hardware>(hw: &H) -> bool {
    // Check `CPUID.1:ECX.VMX[bit 5] == 0`
    //
    if hw.cpuid(1, 0).ecx & CPUID_VMX == 0 {
        log::warn!("Processor does not support VMX");
        return false;
    }

    // Check the lock and `EnableVmxOutsideSmx` bits
    //
    let feature_control = FeatureControl::read(hw);
    if !feature_control.allows_vmxon() {
        log::warn!(
            "VMX is disabled at BIOS level (IA32_FEATURE_CONTROL: {:#x}). You must change a \
             platform firmware setting to enable VMX.",
            feature_control.bits()
        );
        return false;
    }

    true
}
