//! Virtual to physical address helpers for the per-core regions.

use crate::vmx::hardware::Hardware;
use x86::bits64::paging::BASE_PAGE_SIZE;

/// Returns the virtual address of the specified value.
pub fn virtual_address<T: ?Sized>(value: &T) -> u64 {
    value as *const T as *const u8 as u64
}

/// Translates the address of the specified value to its physical address.
pub fn physical_address<H: Hardware, T: ?Sized>(hw: &H, value: &T) -> u64 {
    hw.physical_address(virtual_address(value))
}

/// Translates the address of a region that hardware references by physical
/// address and asserts that it is page aligned.
///
/// # Panics
///
/// Panics if the physical address is not a multiple of the page size. This is
/// a layout defect of the caller and must never be silently tolerated.
pub fn page_aligned_physical_address<H: Hardware, T: ?Sized>(
    hw: &H, value: &T, name: &str,
) -> u64 {
    let pa = physical_address(hw, value);
    log::trace!("{} pa: {:#x}", name, pa);

    assert!(
        is_page_aligned(pa),
        "{} is not page aligned (pa = {:#x})",
        name,
        pa
    );

    pa
}

pub fn is_page_aligned(address: u64) -> bool {
    address % BASE_PAGE_SIZE as u64 == 0
}
