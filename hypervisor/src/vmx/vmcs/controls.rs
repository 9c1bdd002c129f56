//! VM-execution, VM-exit and VM-entry control fields.

use crate::{
    error::HypervisorError,
    vmx::{
        hardware::Hardware,
        msr::VmxBasic,
        vmcs::{vmread, vmwrite},
    },
};
use x86::{
    msr,
    vmx::vmcs::control::{
        self, EntryControls, ExitControls, PinbasedControls, PrimaryControls, SecondaryControls,
    },
};

/// Which capability MSR reports the allowed settings of a control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    PinBased,
    Primary,
    Secondary,
    Exit,
    Entry,
}

impl ControlKind {
    fn capability_msr(self, true_controls: bool) -> u32 {
        match (self, true_controls) {
            (ControlKind::PinBased, true) => msr::IA32_VMX_TRUE_PINBASED_CTLS,
            (ControlKind::PinBased, false) => msr::IA32_VMX_PINBASED_CTLS,
            (ControlKind::Primary, true) => msr::IA32_VMX_TRUE_PROCBASED_CTLS,
            (ControlKind::Primary, false) => msr::IA32_VMX_PROCBASED_CTLS,
            (ControlKind::Secondary, _) => msr::IA32_VMX_PROCBASED_CTLS2,
            (ControlKind::Exit, true) => msr::IA32_VMX_TRUE_EXIT_CTLS,
            (ControlKind::Exit, false) => msr::IA32_VMX_EXIT_CTLS,
            (ControlKind::Entry, true) => msr::IA32_VMX_TRUE_ENTRY_CTLS,
            (ControlKind::Entry, false) => msr::IA32_VMX_ENTRY_CTLS,
        }
    }

    fn field(self) -> u32 {
        match self {
            ControlKind::PinBased => control::PINBASED_EXEC_CONTROLS,
            ControlKind::Primary => control::PRIMARY_PROCBASED_EXEC_CONTROLS,
            ControlKind::Secondary => control::SECONDARY_PROCBASED_EXEC_CONTROLS,
            ControlKind::Exit => control::VMEXIT_CONTROLS,
            ControlKind::Entry => control::VMENTRY_CONTROLS,
        }
    }
}

/// Forces the bits the processor requires to be set (allowed 0-settings, low
/// dword) and clears the ones it does not support (allowed 1-settings, high
/// dword).
pub fn adjust_controls(capability: u64, requested: u32) -> u32 {
    let allowed0 = capability as u32;
    let allowed1 = (capability >> 32) as u32;

    (requested | allowed0) & allowed1
}

/// Writes a control field after adjusting it to the capabilities of the
/// processor. Returns the value that was written.
pub fn write_adjusted<H: Hardware>(
    hw: &mut H, kind: ControlKind, requested: u32,
) -> Result<u32, HypervisorError> {
    let basic = VmxBasic::read(hw);
    let capability = hw.read_msr(kind.capability_msr(basic.true_controls()));

    let value = adjust_controls(capability, requested);
    if value & requested != requested {
        log::warn!(
            "{:?} controls {:#x} not supported, using {:#x}",
            kind,
            requested,
            value
        );
    }

    vmwrite(hw, kind.field(), value)?;
    Ok(value)
}

pub fn read_primary_controls<H: Hardware>(hw: &H) -> Result<PrimaryControls, HypervisorError> {
    vmread(hw, control::PRIMARY_PROCBASED_EXEC_CONTROLS)
        .map(|value| PrimaryControls::from_bits_truncate(value as u32))
}

/// Writes the primary processor-based controls as they are. Reserved bits
/// are taken over from the current value of the field.
pub fn write_primary_controls<H: Hardware>(
    hw: &mut H, controls: PrimaryControls,
) -> Result<(), HypervisorError> {
    let current = vmread(hw, control::PRIMARY_PROCBASED_EXEC_CONTROLS)? as u32;
    let value = (current & !PrimaryControls::all().bits()) | controls.bits();

    vmwrite(hw, control::PRIMARY_PROCBASED_EXEC_CONTROLS, value)
}

fn primary_controls() -> PrimaryControls {
    let controls = PrimaryControls::USE_MSR_BITMAPS | PrimaryControls::SECONDARY_CONTROLS;

    // Exit on every access to CR3 in debug builds.
    //
    cfg_if::cfg_if! {
        if #[cfg(debug_assertions)] {
            controls | PrimaryControls::CR3_LOAD_EXITING | PrimaryControls::CR3_STORE_EXITING
        } else {
            controls
        }
    }
}

/// Writes the execution, exit and entry controls.
pub fn write_control_fields<H: Hardware>(
    hw: &mut H, msr_bitmap_pa: u64,
) -> Result<(), HypervisorError> {
    write_adjusted(
        hw,
        ControlKind::PinBased,
        (PinbasedControls::NMI_EXITING | PinbasedControls::VIRTUAL_NMIS).bits(),
    )?;

    write_adjusted(hw, ControlKind::Primary, primary_controls().bits())?;

    write_adjusted(
        hw,
        ControlKind::Secondary,
        (SecondaryControls::ENABLE_RDTSCP
            | SecondaryControls::ENABLE_INVPCID
            | SecondaryControls::ENABLE_XSAVES_XRSTORS
            | SecondaryControls::ENABLE_USER_WAIT_PAUSE
            | SecondaryControls::CONCEAL_VMX_FROM_PT)
            .bits(),
    )?;

    write_adjusted(
        hw,
        ControlKind::Exit,
        (ExitControls::SAVE_DEBUG_CONTROLS
            | ExitControls::HOST_ADDRESS_SPACE_SIZE
            | ExitControls::CONCEAL_VMX_FROM_PT)
            .bits(),
    )?;

    write_adjusted(
        hw,
        ControlKind::Entry,
        (EntryControls::LOAD_DEBUG_CONTROLS
            | EntryControls::IA32E_MODE_GUEST
            | EntryControls::CONCEAL_VMX_FROM_PT)
            .bits(),
    )?;

    // Intercept no exceptions. With mask and match both zero, every page
    // fault matches, so bit 14 of the (empty) exception bitmap decides.
    //
    vmwrite(hw, control::EXCEPTION_BITMAP, 0u32)?;
    vmwrite(hw, control::PAGE_FAULT_ERR_CODE_MASK, 0u32)?;
    vmwrite(hw, control::PAGE_FAULT_ERR_CODE_MATCH, 0u32)?;

    // The guest owns every bit of CR0 and CR4.
    //
    vmwrite(hw, control::CR0_GUEST_HOST_MASK, 0u64)?;
    vmwrite(hw, control::CR4_GUEST_HOST_MASK, 0u64)?;
    vmwrite(hw, control::CR0_READ_SHADOW, 0u64)?;
    vmwrite(hw, control::CR4_READ_SHADOW, 0u64)?;

    vmwrite(hw, control::CR3_TARGET_COUNT, 0u32)?;
    vmwrite(hw, control::CR3_TARGET_VALUE0, 0u64)?;
    vmwrite(hw, control::CR3_TARGET_VALUE1, 0u64)?;
    vmwrite(hw, control::CR3_TARGET_VALUE2, 0u64)?;
    vmwrite(hw, control::CR3_TARGET_VALUE3, 0u64)?;

    vmwrite(hw, control::MSR_BITMAPS_ADDR_FULL, msr_bitmap_pa)?;

    vmwrite(hw, control::VMEXIT_MSR_STORE_COUNT, 0u32)?;
    vmwrite(hw, control::VMEXIT_MSR_STORE_ADDR_FULL, 0u64)?;
    vmwrite(hw, control::VMEXIT_MSR_LOAD_COUNT, 0u32)?;
    vmwrite(hw, control::VMEXIT_MSR_LOAD_ADDR_FULL, 0u64)?;
    vmwrite(hw, control::VMENTRY_MSR_LOAD_COUNT, 0u32)?;
    vmwrite(hw, control::VMENTRY_MSR_LOAD_ADDR_FULL, 0u64)?;

    // Nothing to inject on the first entry.
    //
    vmwrite(hw, control::VMENTRY_INTERRUPTION_INFO_FIELD, 0u32)?;
    vmwrite(hw, control::VMENTRY_EXCEPTION_ERR_CODE, 0u32)?;
    vmwrite(hw, control::VMENTRY_INSTRUCTION_LEN, 0u32)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmx::hardware::fake::FakeHardware;

    fn active_fake() -> FakeHardware {
        let mut hw = FakeHardware::new();
        hw.current_vmcs = Some(0x2000);
        hw
    }

    #[test]
    fn test_adjust_controls() {
        // Bits 1, 2 and 4 must be set, bits above 7 are unsupported.
        //
        let capability = 0x0000_00ff_0000_0016;

        assert_eq!(adjust_controls(capability, 0x28), 0x3e);
        assert_eq!(adjust_controls(capability, 1 << 31), 0x16);
    }

    #[test]
    fn test_uses_true_capability_msrs() {
        let mut hw = active_fake();
        hw.msrs.insert(msr::IA32_VMX_PINBASED_CTLS, 0);
        hw.msrs.insert(msr::IA32_VMX_TRUE_PINBASED_CTLS, 0xffff_ffff_0000_0016);

        let value = write_adjusted(&mut hw, ControlKind::PinBased, 1 << 3).ok();

        assert_eq!(value, Some(0x1e));
        assert_eq!(hw.field(control::PINBASED_EXEC_CONTROLS), Some(0x1e));
    }

    #[test]
    fn test_control_fields() {
        let mut hw = active_fake();

        assert!(write_control_fields(&mut hw, 0x7000).is_ok());

        let pin = PinbasedControls::from_bits_truncate(
            hw.field(control::PINBASED_EXEC_CONTROLS).unwrap_or_default() as u32,
        );
        assert!(pin.contains(PinbasedControls::NMI_EXITING | PinbasedControls::VIRTUAL_NMIS));

        let primary = PrimaryControls::from_bits_truncate(
            hw.field(control::PRIMARY_PROCBASED_EXEC_CONTROLS).unwrap_or_default() as u32,
        );
        assert!(primary.contains(PrimaryControls::USE_MSR_BITMAPS));
        assert!(primary.contains(PrimaryControls::SECONDARY_CONTROLS));
        assert!(!primary.contains(PrimaryControls::NMI_WINDOW_EXITING));

        let cr3_exiting = PrimaryControls::CR3_LOAD_EXITING | PrimaryControls::CR3_STORE_EXITING;
        assert_eq!(primary.contains(cr3_exiting), cfg!(debug_assertions));

        let secondary = SecondaryControls::from_bits_truncate(
            hw.field(control::SECONDARY_PROCBASED_EXEC_CONTROLS).unwrap_or_default() as u32,
        );
        assert_eq!(
            secondary,
            SecondaryControls::ENABLE_RDTSCP
                | SecondaryControls::ENABLE_INVPCID
                | SecondaryControls::ENABLE_XSAVES_XRSTORS
                | SecondaryControls::ENABLE_USER_WAIT_PAUSE
                | SecondaryControls::CONCEAL_VMX_FROM_PT
        );

        let exit = ExitControls::from_bits_truncate(
            hw.field(control::VMEXIT_CONTROLS).unwrap_or_default() as u32,
        );
        assert!(exit.contains(
            ExitControls::SAVE_DEBUG_CONTROLS
                | ExitControls::HOST_ADDRESS_SPACE_SIZE
                | ExitControls::CONCEAL_VMX_FROM_PT
        ));

        let entry = EntryControls::from_bits_truncate(
            hw.field(control::VMENTRY_CONTROLS).unwrap_or_default() as u32,
        );
        assert!(entry.contains(
            EntryControls::LOAD_DEBUG_CONTROLS
                | EntryControls::IA32E_MODE_GUEST
                | EntryControls::CONCEAL_VMX_FROM_PT
        ));

        assert_eq!(hw.field(control::MSR_BITMAPS_ADDR_FULL), Some(0x7000));
        assert_eq!(hw.field(control::EXCEPTION_BITMAP), Some(0));
        assert_eq!(hw.field(control::CR0_GUEST_HOST_MASK), Some(0));
        assert_eq!(hw.field(control::CR3_TARGET_COUNT), Some(0));
        assert_eq!(hw.field(control::VMENTRY_INTERRUPTION_INFO_FIELD), Some(0));
    }

    #[test]
    fn test_primary_controls_keep_reserved_bits() {
        let mut hw = active_fake();
        hw.vmcs_fields
            .entry(0x2000)
            .or_default()
            .insert(control::PRIMARY_PROCBASED_EXEC_CONTROLS, 0x0400_6172);

        let controls = read_primary_controls(&hw).unwrap() | PrimaryControls::NMI_WINDOW_EXITING;
        assert!(write_primary_controls(&mut hw, controls).is_ok());

        assert_eq!(
            hw.field(control::PRIMARY_PROCBASED_EXEC_CONTROLS),
            Some(0x0440_6172)
        );
    }
}
