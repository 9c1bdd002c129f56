//! Processor-virtualization core of a thin Intel VT-x hypervisor.
//!
//! Brings a single core into VMX root operation, programs its VMCS so the
//! currently running context continues as the guest and dispatches the
//! vm-exits that come back.

#![cfg_attr(not(test), no_std)]

#[macro_use] extern crate static_assertions;

pub mod error;
pub mod utils;
pub mod vmx;
