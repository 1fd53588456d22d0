//! # Reaching Physical Pages
//!
//! The allocator writes junk patterns into pages and copies pages for
//! copy-on-write, so it needs a way to turn a physical page into a pointer in
//! the current address space. [`PhysMemory`] abstracts that:
//!
//! * [`HhdmPhysMemory`] for the kernel, where all RAM is mapped at
//!   [`HHDM_BASE`] + `pa`.
//! * [`PhysArena`] for hosted builds and tests, where "physical memory" is a
//!   heap allocation posing at a chosen physical base.
//!
//! Only pointers are produced; whoever dereferences them is responsible for
//! exclusivity.

use crate::Page;
use alloc::boxed::Box;
use core::cell::UnsafeCell;
use kernel_info::memory::HHDM_BASE;
use kernel_info::params::PAGE_SIZE;
use kernel_memory_addresses::PhysicalAddress;

/// Bytes of one page.
pub type PageBytes = [u8; PAGE_SIZE];

/// Translation from physical pages to usable pointers.
pub trait PhysMemory: Sync {
    /// Pointer to the first byte of `page` in the current address space.
    ///
    /// Computing the pointer is harmless; dereferencing it requires that the
    /// page is actually mapped and that no one else accesses it at the same
    /// time.
    fn page_ptr(&self, page: Page) -> *mut PageBytes;
}

/// [`PhysMemory`] for kernels with a higher-half direct map.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMemory;

impl PhysMemory for HhdmPhysMemory {
    #[inline]
    fn page_ptr(&self, page: Page) -> *mut PageBytes {
        core::ptr::with_exposed_provenance_mut((HHDM_BASE + page.base().as_u64()) as usize)
    }
}

/// Heap-backed stand-in for a range of RAM.
///
/// # Example
/// ```rust
/// use kernel_alloc::phys_mapper::{PhysArena, PhysMemory};
/// use kernel_memory_addresses::PhysicalAddress;
///
/// let arena = PhysArena::new(PhysicalAddress::new(0x8000_0000), 4);
/// let (start, end) = arena.range();
/// assert_eq!(end.as_u64() - start.as_u64(), 4 * 4096);
/// ```
pub struct PhysArena {
    base: PhysicalAddress,
    pages: Box<[UnsafeCell<PageBytes>]>,
}

// Safety: the arena only hands out raw pointers; accesses through them are
// the caller's responsibility, exactly like real RAM.
unsafe impl Sync for PhysArena {}
unsafe impl Send for PhysArena {}

impl PhysArena {
    /// `pages` zeroed pages starting at physical address `base`.
    ///
    /// # Panics
    /// If `base` is not page aligned.
    #[must_use]
    pub fn new(base: PhysicalAddress, pages: usize) -> Self {
        assert!(
            base.as_u64() % PAGE_SIZE as u64 == 0,
            "arena base {base} is not page aligned"
        );
        Self {
            base,
            pages: (0..pages).map(|_| UnsafeCell::new([0; PAGE_SIZE])).collect(),
        }
    }

    /// Covered physical range, end exclusive.
    #[must_use]
    pub fn range(&self) -> (PhysicalAddress, PhysicalAddress) {
        let len = (self.pages.len() * PAGE_SIZE) as u64;
        (self.base, PhysicalAddress::new(self.base.as_u64() + len))
    }
}

impl PhysMemory for PhysArena {
    /// # Panics
    /// If `page` lies outside the arena.
    fn page_ptr(&self, page: Page) -> *mut PageBytes {
        let offset = page
            .base()
            .as_u64()
            .checked_sub(self.base.as_u64())
            .map(|off| off as usize / PAGE_SIZE);
        match offset.and_then(|index| self.pages.get(index)) {
            Some(cell) => cell.get(),
            None => panic!("page {page} is outside the arena"),
        }
    }
}

impl<M: PhysMemory + ?Sized> PhysMemory for &M {
    #[inline]
    fn page_ptr(&self, page: Page) -> *mut PageBytes {
        (**self).page_ptr(page)
    }
}
