use bitfield::bitfield;
use x86::bits64::paging::BASE_PAGE_SIZE;

bitfield! {
    /// First four bytes of the VMXON region and of a VMCS.
    ///
    /// Bit 31 indicates a shadow VMCS and must be zero in the VMXON region.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(C)]
    pub struct VmcsHeader(u32);
    impl Debug;

    pub revision_id, set_revision_id: 30, 0;
    pub shadow, set_shadow: 31;
}

impl VmcsHeader {
    pub fn new(revision_id: u32) -> Self {
        let mut header = Self(0);
        header.set_revision_id(revision_id);
        header.set_shadow(false);
        header
    }
}

/// Region referenced by `vmxon`.
#[repr(C, align(4096))]
pub struct VmxonRegion {
    pub header: VmcsHeader,
    pub reserved: u32,
    pub data: [u8; BASE_PAGE_SIZE - 8],
}
const_assert_eq!(core::mem::size_of::<VmxonRegion>(), BASE_PAGE_SIZE);
const_assert_eq!(core::mem::align_of::<VmxonRegion>(), BASE_PAGE_SIZE);

impl VmxonRegion {
    pub const fn new() -> Self {
        Self {
            header: VmcsHeader(0),
            reserved: 0,
            data: [0; BASE_PAGE_SIZE - 8],
        }
    }

    pub fn stamp(&mut self, revision_id: u32) {
        self.header = VmcsHeader::new(revision_id);
        self.reserved = 0;
    }
}

/// The virtual machine control structure. After the header has been written,
/// the contents are only accessed with `vmread`/`vmwrite`.
#[repr(C, align(4096))]
pub struct VmcsRegion {
    pub header: VmcsHeader,
    pub abort_indicator: u32,
    pub data: [u8; BASE_PAGE_SIZE - 8],
}
const_assert_eq!(core::mem::size_of::<VmcsRegion>(), BASE_PAGE_SIZE);
const_assert_eq!(core::mem::align_of::<VmcsRegion>(), BASE_PAGE_SIZE);

impl VmcsRegion {
    pub const fn new() -> Self {
        Self {
            header: VmcsHeader(0),
            abort_indicator: 0,
            data: [0; BASE_PAGE_SIZE - 8],
        }
    }

    /// Writes the revision identifier and marks the structure as an ordinary
    /// (non-shadow) VMCS.
    pub fn stamp(&mut self, revision_id: u32) {
        self.header = VmcsHeader::new(revision_id);
    }
}
