//! Access to the fields of the current VMCS.

use crate::{
    error::{HypervisorError, VmcsReadSnafu, VmcsWriteSnafu},
    utils::debug::dbg_break,
    vmx::hardware::Hardware,
};

pub mod controls;
pub mod guest;
pub mod host;

/// Reads a field of the current VMCS.
pub fn vmread<H: Hardware>(hw: &H, field: u32) -> Result<u64, HypervisorError> {
    hw.vmread(field).map_err(|error| {
        log::error!("Failed to read vmcs field {:#x}: {:?}", field, error);
        dbg_break!();

        VmcsReadSnafu { field, error }.build()
    })
}

/// Writes a field of the current VMCS.
///
/// A failure means that the field does not exist or that no VMCS is current,
/// neither of which can happen after a successful `vmptrld`.
pub fn vmwrite<H: Hardware, T: Into<u64>>(
    hw: &mut H, field: u32, value: T,
) -> Result<(), HypervisorError> {
    let value = value.into();

    hw.vmwrite(field, value).map_err(|error| {
        log::error!(
            "Failed to write {:#x} to vmcs field {:#x}: {:?}",
            value,
            field,
            error
        );
        dbg_break!();

        VmcsWriteSnafu { field, error }.build()
    })
}
