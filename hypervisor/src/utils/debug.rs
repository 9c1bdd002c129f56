/// Breaks into an attached debugger.
///
/// Only emits `int 3` when the `breakpoints` feature is enabled, because
/// without a debugger attached the breakpoint would be delivered through the
/// host IDT of the hypervisor.
macro_rules! dbg_break {
    () => {
        #[cfg(all(feature = "breakpoints", target_arch = "x86_64", not(test)))]
        #[allow(unused_unsafe)]
        unsafe {
            core::arch::asm!("int 3")
        };
    };
}

pub(crate) use dbg_break;
