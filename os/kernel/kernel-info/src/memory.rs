//! # Physical Memory Window

/// Base of the higher-half direct map.
///
/// Physical address `pa` is reachable at `HHDM_BASE + pa` once the kernel's
/// page tables are live.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Default bottom of the RAM handed to the page allocator, past the kernel
/// image.
pub const PHYS_ALLOC_START: u64 = 0x0040_0000;

/// Default end (exclusive) of the RAM handed to the page allocator.
pub const PHYS_ALLOC_END: u64 = 0x0840_0000;

const _: () = {
    assert!(PHYS_ALLOC_START < PHYS_ALLOC_END);
    assert!(PHYS_ALLOC_START % crate::params::PAGE_SIZE as u64 == 0);
    assert!(PHYS_ALLOC_END % crate::params::PAGE_SIZE as u64 == 0);
};
