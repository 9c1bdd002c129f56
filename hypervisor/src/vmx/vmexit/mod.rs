use crate::{
    error::{HypervisorError, UnhandledExitReasonSnafu},
    utils::debug::dbg_break,
    vmx::{context::GuestContext, hardware::Hardware, vmcs::vmread},
};
use bitfield::bitfield;
use x86::vmx::vmcs::{guest, ro};

pub mod interrupt;

bitfield! {
    /// The exit reason field of the VMCS.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ExitReason(u32);
    impl Debug;

    pub u16, basic, _: 15, 0;
    pub enclave_mode, _: 27;
    pub pending_mtf, _: 28;
    pub from_root, _: 29;
    pub entry_failure, _: 31;
}

impl ExitReason {
    pub fn read<H: Hardware>(hw: &H) -> Result<Self, HypervisorError> {
        vmread(hw, ro::EXIT_REASON).map(|value| Self(value as u32))
    }
}

/// The basic exit reasons that are routed to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum VmExitCode {
    ExceptionOrNmi = 0,
    NmiWindow = 8,
    Cpuid = 10,
    MovCr = 28,
    Rdmsr = 31,
    Wrmsr = 32,
}

impl VmExitCode {
    pub fn from_basic(basic: u16) -> Option<Self> {
        Some(match basic {
            0 => VmExitCode::ExceptionOrNmi,
            8 => VmExitCode::NmiWindow,
            10 => VmExitCode::Cpuid,
            28 => VmExitCode::MovCr,
            31 => VmExitCode::Rdmsr,
            32 => VmExitCode::Wrmsr,
            _ => return None,
        })
    }
}

pub type VmExitHandler<H> = fn(&mut H, &mut GuestContext);

/// Handlers for every exit reason the hypervisor causes. They are provided by
/// the driver and may modify the guest registers before it is resumed.
pub struct VmExitHandlers<H> {
    pub exception_or_nmi: VmExitHandler<H>,
    pub nmi_window: VmExitHandler<H>,
    pub cpuid: VmExitHandler<H>,
    pub mov_cr: VmExitHandler<H>,
    pub rdmsr: VmExitHandler<H>,
    pub wrmsr: VmExitHandler<H>,
}

impl<H> VmExitHandlers<H> {
    pub fn get(&self, code: VmExitCode) -> VmExitHandler<H> {
        match code {
            VmExitCode::ExceptionOrNmi => self.exception_or_nmi,
            VmExitCode::NmiWindow => self.nmi_window,
            VmExitCode::Cpuid => self.cpuid,
            VmExitCode::MovCr => self.mov_cr,
            VmExitCode::Rdmsr => self.rdmsr,
            VmExitCode::Wrmsr => self.wrmsr,
        }
    }
}

/// Called by the vm-exit trampoline after it saved the guest registers.
///
/// Exit reasons without a handler are bugs in the hypervisor, since it only
/// enables the exits it handles. They are reported as
/// [`HypervisorError::UnhandledExitReason`] and the guest must not be resumed.
pub fn handle_vm_exit<H: Hardware>(
    hw: &mut H, handlers: &VmExitHandlers<H>, context: &mut GuestContext,
) -> Result<(), HypervisorError> {
    let reason = ExitReason::read(hw)?;

    let Some(code) = VmExitCode::from_basic(reason.basic()) else {
        let rip = vmread(hw, guest::RIP)?;

        log::error!(
            "Unhandled vm-exit reason {} ({:#x}) at rip {:#x}",
            reason.basic(),
            reason.0,
            rip
        );
        dbg_break!();

        return UnhandledExitReasonSnafu {
            reason: reason.basic(),
            rip,
        }
        .fail();
    };

    log::trace!("Handling vm-exit {:?}", code);

    let handler = handlers.get(code);
    handler(hw, context);

    Ok(())
}
