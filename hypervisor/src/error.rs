use snafu::prelude::*;
use x86::vmx::VmFail;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HypervisorError {
    #[snafu(display("Unhandled vm-exit reason {reason} at rip {rip:#x}"))]
    UnhandledExitReason { reason: u16, rip: u64 },

    #[snafu(display("VMREAD of field {field:#x} failed: {error:?}"))]
    VmcsRead { field: u32, error: VmFail },

    #[snafu(display("VMWRITE of field {field:#x} failed: {error:?}"))]
    VmcsWrite { field: u32, error: VmFail },
}
