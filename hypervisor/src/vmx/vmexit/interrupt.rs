use crate::{
    error::HypervisorError,
    vmx::{
        context::TrapFrame,
        hardware::Hardware,
        vmcs::controls::{read_primary_controls, write_primary_controls},
    },
};
use x86::{irq::NONMASKABLE_INTERRUPT_VECTOR, vmx::vmcs::control::PrimaryControls};

/// Called by the host interrupt handlers for interrupts that arrive while the
/// processor is in root mode.
///
/// An NMI cannot be delivered to the guest right away because the guest may
/// be blocking NMIs. NMI-window exiting causes a vm-exit as soon as the guest
/// is able to take it, and the NMI-window handler injects it then. All other
/// vectors are ignored.
pub fn handle_host_interrupt<H: Hardware>(
    hw: &mut H, frame: &TrapFrame,
) -> Result<(), HypervisorError> {
    if frame.vector != NONMASKABLE_INTERRUPT_VECTOR as u64 {
        return Ok(());
    }

    let controls = read_primary_controls(hw)?;
    write_primary_controls(hw, controls | PrimaryControls::NMI_WINDOW_EXITING)
}
