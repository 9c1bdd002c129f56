use crate::vmx::HOST_STACK_SIZE;
use x86::bits64::{paging::BASE_PAGE_SIZE, task::TaskStateSegment};

/// Stack used by the vm-exit trampoline while the processor is in root mode.
#[repr(C, align(4096))]
pub struct HostStack {
    pub data: [u8; HOST_STACK_SIZE],
}
const_assert_eq!(core::mem::size_of::<HostStack>(), 0x6000);

impl HostStack {
    pub const fn new() -> Self {
        Self {
            data: [0; HOST_STACK_SIZE],
        }
    }

    /// Initial host RSP.
    ///
    /// The processor enters the trampoline without pushing a return address,
    /// so `rsp + 8` has to be 16-byte aligned like right after a `call`.
    pub fn top(base: u64) -> u64 {
        ((base + HOST_STACK_SIZE as u64) & !0xF) - 8
    }
}

/// Task-state segment of the host. Only needed so that TR can be loaded, the
/// contents stay zero.
#[repr(C, align(4096))]
pub struct HostTss {
    pub segment: TaskStateSegment,
}
const_assert_eq!(core::mem::size_of::<TaskStateSegment>(), 104);
const_assert_eq!(core::mem::size_of::<HostTss>(), BASE_PAGE_SIZE);

impl HostTss {
    pub const fn new() -> Self {
        Self {
            segment: TaskStateSegment::new(),
        }
    }

    pub fn clear(&mut self) {
        self.segment = TaskStateSegment::new();
    }

    /// Limit of the TSS descriptor.
    pub const fn limit() -> u32 {
        core::mem::size_of::<TaskStateSegment>() as u32 - 1
    }
}
