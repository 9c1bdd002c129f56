/// General purpose registers of the guest, saved by the vm-exit trampoline.
///
/// Changes made by a handler are loaded into the guest when it is resumed.
/// The `rsp` slot keeps the register encoding contiguous and holds the host
/// stack pointer at the time of the exit. The guest RSP and RIP are read from
/// and written to the VMCS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct GuestContext {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}
const_assert_eq!(core::mem::size_of::<GuestContext>(), 16 * 8);

impl GuestContext {
    /// Returns the register with the specified encoding, as used by the exit
    /// qualification of control register accesses (0 = RAX, ..., 15 = R15).
    pub fn gpr(&self, index: u8) -> Option<u64> {
        self.registers().get(index as usize).copied()
    }

    pub fn gpr_mut(&mut self, index: u8) -> Option<&mut u64> {
        self.registers_mut().get_mut(index as usize)
    }

    fn registers(&self) -> &[u64; 16] {
        unsafe { &*(self as *const Self as *const [u64; 16]) }
    }

    fn registers_mut(&mut self) -> &mut [u64; 16] {
        unsafe { &mut *(self as *mut Self as *mut [u64; 16]) }
    }
}

/// Frame pushed by the root mode interrupt stubs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    pub fn for_vector(vector: u8) -> Self {
        Self {
            vector: vector as u64,
            ..Default::default()
        }
    }
}
