use x86::bits64::paging::BASE_PAGE_SIZE;

const LOW_MSRS: core::ops::RangeInclusive<u32> = 0x0000_0000..=0x0000_1FFF;
const HIGH_MSRS: core::ops::RangeInclusive<u32> = 0xC000_0000..=0xC000_1FFF;

/// Intercept bitmap for `rdmsr`/`wrmsr`. A set bit causes a vm-exit, a clear
/// bit lets the guest access the MSR directly.
///
/// MSRs outside of the two covered ranges always cause a vm-exit.
#[repr(C, align(4096))]
pub struct MsrBitmap {
    /// Reads of 0000_0000 to 0000_1FFF
    pub read_low: [u8; 0x400],
    /// Reads of C000_0000 to C000_1FFF
    pub read_high: [u8; 0x400],
    /// Writes of 0000_0000 to 0000_1FFF
    pub write_low: [u8; 0x400],
    /// Writes of C000_0000 to C000_1FFF
    pub write_high: [u8; 0x400],
}
const_assert_eq!(core::mem::size_of::<MsrBitmap>(), BASE_PAGE_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl MsrBitmap {
    pub const fn new() -> Self {
        Self {
            read_low: [0; 0x400],
            read_high: [0; 0x400],
            write_low: [0; 0x400],
            write_high: [0; 0x400],
        }
    }

    /// Intercepts nothing.
    pub fn clear(&mut self) {
        self.read_low.fill(0);
        self.read_high.fill(0);
        self.write_low.fill(0);
        self.write_high.fill(0);
    }

    /// Returns `false` if the MSR is not covered by the bitmap.
    pub fn hook_msr(&mut self, msr: u32) -> bool {
        self.hook_rdmsr(msr) && self.hook_wrmsr(msr)
    }

    pub fn hook_rdmsr(&mut self, msr: u32) -> bool {
        self.set(msr, Access::Read, true)
    }

    pub fn hook_wrmsr(&mut self, msr: u32) -> bool {
        self.set(msr, Access::Write, true)
    }

    pub fn unhook_msr(&mut self, msr: u32) -> bool {
        self.set(msr, Access::Read, false) && self.set(msr, Access::Write, false)
    }

    pub fn is_rdmsr_hooked(&self, msr: u32) -> bool {
        self.get(msr, Access::Read)
    }

    pub fn is_wrmsr_hooked(&self, msr: u32) -> bool {
        self.get(msr, Access::Write)
    }

    fn range(&self, msr: u32, access: Access) -> Option<&[u8; 0x400]> {
        match (LOW_MSRS.contains(&msr), HIGH_MSRS.contains(&msr), access) {
            (true, _, Access::Read) => Some(&self.read_low),
            (true, _, Access::Write) => Some(&self.write_low),
            (_, true, Access::Read) => Some(&self.read_high),
            (_, true, Access::Write) => Some(&self.write_high),
            _ => None,
        }
    }

    fn range_mut(&mut self, msr: u32, access: Access) -> Option<&mut [u8; 0x400]> {
        match (LOW_MSRS.contains(&msr), HIGH_MSRS.contains(&msr), access) {
            (true, _, Access::Read) => Some(&mut self.read_low),
            (true, _, Access::Write) => Some(&mut self.write_low),
            (_, true, Access::Read) => Some(&mut self.read_high),
            (_, true, Access::Write) => Some(&mut self.write_high),
            _ => None,
        }
    }

    fn set(&mut self, msr: u32, access: Access, intercept: bool) -> bool {
        let Some(range) = self.range_mut(msr, access) else {
            log::warn!("MSR {:#x} is not covered by the msr bitmap", msr);
            return false;
        };

        let bit = (msr & 0x1FFF) as usize;
        if intercept {
            range[bit / 8] |= 1 << (bit % 8);
        } else {
            range[bit / 8] &= !(1 << (bit % 8));
        }

        true
    }

    fn get(&self, msr: u32, access: Access) -> bool {
        // Not covered means the access always exits.
        //
        let Some(range) = self.range(msr, access) else { return true };

        let bit = (msr & 0x1FFF) as usize;
        range[bit / 8] & (1 << (bit % 8)) != 0
    }
}

impl Default for MsrBitmap {
    fn default() -> Self {
        Self::new()
    }
}
