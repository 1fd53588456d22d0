//! # Physical Page Allocation
//!
//! Hands out [`PAGE_SIZE`](kernel_info::params::PAGE_SIZE) physical pages to
//! the rest of the kernel and tracks copy-on-write sharing of them.
//!
//! ```text
//!          allocate(cpu)                       free(cpu, page)
//!               │                                    ▲
//!   ┌───────────▼────────────┐          ┌────────────┴───────────┐
//!   │ cpu's free list        │ ──empty──▶ peers, round-robin,     │
//!   │ (own spin lock)        │          │ one lock at a time      │
//!   └───────────┬────────────┘          └─────────────────────────┘
//!               │ fill ALLOC_JUNK, refcount := 1
//!               ▼
//!   Free ──▶ Owned(1) ──share──▶ Shared(k) ──prepare_for_write──▶ Shared(k−1)
//!    ▲                                                            + Owned(1) copy
//!    └──────────── free × k (last one fills FREE_JUNK) ───────────┘
//! ```
//!
//! ## Components
//!
//! * [`frame_alloc`]: the [`PageAllocator`], one free list per CPU, stealing
//!   from peers when the local list is empty. The CPU index is passed in by
//!   the caller on every call.
//! * [`phys_mapper`]: how the allocator reaches page contents, either through
//!   the higher-half direct map or a heap-backed arena.
//! * Free lists are index stacks threaded through one link word per page. The
//!   link word also tells whether a page is allocated, which catches double
//!   frees even without copy-on-write tracking.
//!
//! ## Failure Model
//!
//! Running out of pages is an ordinary [`AllocError`]: the caller decides
//! whether to retry or fail its own operation. Misuse (freeing a misaligned,
//! foreign or already free page, a fresh page with a stale sharing count, a
//! sharing count leaving its range) panics.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{PageAllocator, PageAllocatorConfig, phys_mapper::PhysArena};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let arena = PhysArena::new(PhysicalAddress::new(0x8000_0000), 8);
//! let config = PageAllocatorConfig { cpus: 2, cow_tracking: true };
//! let pages = PageAllocator::from_arena(arena, config).unwrap();
//!
//! let page = pages.allocate(0).unwrap();
//! assert_eq!(pages.share(page), 2);
//!
//! // The second owner writes: it gets a private copy.
//! let copy = pages.prepare_for_write(1, page).unwrap();
//! assert_ne!(copy, page);
//! assert_eq!(pages.refcount(page), Some(1));
//!
//! pages.free(0, page);
//! pages.free(1, copy);
//! assert_eq!(pages.total_free(), 8);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
mod free_list;
pub mod phys_mapper;
mod refcount;

pub use frame_alloc::{CpuId, PageAllocator, PageAllocatorConfig, WriteTarget};

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Handle of one physical page.
pub type Page = PhysicalPage<Size4K>;

/// Recoverable allocation failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("no free physical page on any CPU")]
    OutOfMemory,
}

/// The allocator could not be set up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("the allocator needs at least one CPU")]
    NoCpus,
    #[error("no whole page fits in [{start}, {end})")]
    EmptyRange {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    #[error("{pages} pages exceed what one allocator can index")]
    TooManyPages { pages: u64 },
}

/// Inconsistent allocator bookkeeping, as found by
/// [`PageAllocator::check_invariants`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageInvariantViolation {
    #[error("page {page} appears twice on the free lists (again on cpu {cpu})")]
    Relisted { page: Page, cpu: CpuId },
    #[error("free list of cpu {cpu} holds {walked} pages but records {recorded}")]
    LengthMismatch {
        cpu: CpuId,
        walked: usize,
        recorded: usize,
    },
    #[error("page {page} is marked free but sits on no list, or the other way round")]
    StateMismatch { page: Page },
    #[error("page {page} has sharing count {count} that contradicts its list state")]
    CountMismatch { page: Page, count: u16 },
}

impl PageAllocator<phys_mapper::PhysArena> {
    /// Manage every page of a heap-backed arena.
    ///
    /// # Errors
    /// As [`PageAllocator::new`].
    pub fn from_arena(
        arena: phys_mapper::PhysArena,
        config: PageAllocatorConfig,
    ) -> Result<Self, InitError> {
        let (start, end) = arena.range();
        // Safety: the arena owns its memory and moves into the allocator.
        unsafe { Self::new(arena, start, end, config) }
    }
}

impl PageAllocator<phys_mapper::HhdmPhysMemory> {
    /// Manage the default RAM window
    /// ([`PHYS_ALLOC_START`](kernel_info::memory::PHYS_ALLOC_START) up to
    /// [`PHYS_ALLOC_END`](kernel_info::memory::PHYS_ALLOC_END)) through the
    /// higher-half direct map.
    ///
    /// # Errors
    /// As [`PageAllocator::new`].
    ///
    /// # Safety
    /// The direct map must cover the window, and the window must hold free
    /// RAM not used by the kernel image or anything else.
    pub unsafe fn direct_mapped(config: PageAllocatorConfig) -> Result<Self, InitError> {
        use kernel_info::memory::{PHYS_ALLOC_END, PHYS_ALLOC_START};

        // Safety: forwarded to the caller.
        unsafe {
            Self::new(
                phys_mapper::HhdmPhysMemory,
                PhysicalAddress::new(PHYS_ALLOC_START),
                PhysicalAddress::new(PHYS_ALLOC_END),
                config,
            )
        }
    }
}
