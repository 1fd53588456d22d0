//! # Per-CPU Physical Page Allocator
//!
//! Every CPU owns a free list behind its own spin lock; `allocate` and `free`
//! on different CPUs never touch the same lock in the common case. A CPU whose
//! list runs dry takes a page from the first non-empty peer, scanning the
//! other CPUs in round-robin order starting after itself.
//!
//! Pages are junk-filled in both directions ([`ALLOC_JUNK`] when handed out,
//! [`FREE_JUNK`] when returned) so that reads of uninitialized or freed memory
//! show up as garbage rather than plausible data.
//!
//! With copy-on-write tracking enabled, every page carries a sharing count.
//! `free` drops one share and only recycles the page once nobody refers to it.

use crate::free_list::{FreeList, Links, MAX_PAGES, NIL};
use crate::phys_mapper::PhysMemory;
use crate::refcount::RefCounts;
use crate::{AllocError, InitError, Page, PageInvariantViolation};
use alloc::boxed::Box;
use alloc::vec;
use core::{fmt, ptr};
use kernel_info::params::{ALLOC_JUNK, FREE_JUNK, NCPU, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, Size4K};
use kernel_sync::SpinLock;
use log::{debug, error, info, trace, warn};

/// Index of an execution unit (CPU) with its own free list.
pub type CpuId = usize;

/// Shape of a [`PageAllocator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageAllocatorConfig {
    /// Number of per-CPU free lists.
    pub cpus: usize,
    /// Keep per-page sharing counts for copy-on-write.
    pub cow_tracking: bool,
}

impl Default for PageAllocatorConfig {
    fn default() -> Self {
        Self {
            cpus: NCPU,
            cow_tracking: true,
        }
    }
}

/// Where a write to a possibly shared page has to go.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// The caller is the only owner and may write in place.
    Exclusive(Page),
    /// The page is shared; copy `from` into the fresh page `to` and write
    /// there. `from` keeps its count.
    Copy { from: Page, to: Page },
}

impl WriteTarget {
    /// The page the write ends up in.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Page {
        match self {
            Self::Exclusive(page) | Self::Copy { to: page, .. } => page,
        }
    }
}

/// The physical page allocator.
pub struct PageAllocator<M> {
    memory: M,
    start: PhysicalAddress,
    pages: u32,
    links: Links,
    cpus: Box<[SpinLock<FreeList>]>,
    refcounts: Option<RefCounts>,
}

impl<M: PhysMemory> PageAllocator<M> {
    /// Take over the pages in `[start, end)` and spread them round-robin over
    /// the per-CPU lists. `start` is rounded up and `end` down to page
    /// boundaries.
    ///
    /// # Errors
    /// If the configuration has no CPUs or the range holds no (or too many)
    /// pages.
    ///
    /// # Safety
    /// Every page in the range must be RAM reachable through `memory`, and
    /// nothing else may use it for as long as the allocator lives.
    pub unsafe fn new(
        memory: M,
        start: PhysicalAddress,
        end: PhysicalAddress,
        config: PageAllocatorConfig,
    ) -> Result<Self, InitError> {
        if config.cpus == 0 {
            return Err(InitError::NoCpus);
        }

        let first = start.align_up::<Size4K>();
        let last = end.align_down::<Size4K>();
        if first.as_u64() >= last.as_u64() {
            return Err(InitError::EmptyRange { start, end });
        }
        let count = (last.as_u64() - first.as_u64()) / PAGE_SIZE as u64;
        let pages = match u32::try_from(count) {
            Ok(pages) if pages <= MAX_PAGES => pages,
            _ => return Err(InitError::TooManyPages { pages: count }),
        };

        let mut cpus = vec![];
        cpus.resize_with(config.cpus, || SpinLock::named("kmem", FreeList::new()));

        let allocator = Self {
            memory,
            start: first,
            pages,
            links: Links::new(pages),
            cpus: cpus.into_boxed_slice(),
            refcounts: config
                .cow_tracking
                .then(|| RefCounts::new(pages as usize)),
        };

        for index in 0..pages {
            let cpu = index as usize % config.cpus;
            allocator.recycle(cpu, index);
        }

        info!(
            "kalloc: {pages} pages in [{first}, {last}) over {} CPUs, copy-on-write {}",
            config.cpus,
            if config.cow_tracking { "on" } else { "off" }
        );
        Ok(allocator)
    }

    #[inline]
    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    /// Number of per-CPU lists.
    #[inline]
    #[must_use]
    pub fn cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Number of pages under management.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.pages as usize
    }

    /// Managed range, end exclusive.
    #[must_use]
    pub const fn range(&self) -> (PhysicalAddress, PhysicalAddress) {
        let len = self.pages as u64 * PAGE_SIZE as u64;
        (self.start, PhysicalAddress::new(self.start.as_u64() + len))
    }

    /// Whether `page` is an aligned page inside the managed range.
    #[must_use]
    pub fn manages(&self, page: Page) -> bool {
        self.index_of(page).is_some()
    }

    /// Whether sharing counts are kept.
    #[inline]
    #[must_use]
    pub const fn cow_tracking(&self) -> bool {
        self.refcounts.is_some()
    }

    /// Hand out one page, junk-filled, with a sharing count of one.
    ///
    /// `cpu`'s own list is tried first, then every other CPU's once.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when all lists are empty.
    ///
    /// # Panics
    /// If `cpu` is not a valid CPU index, or if the page taken from a free
    /// list still has a nonzero sharing count.
    pub fn allocate(&self, cpu: CpuId) -> Result<Page, AllocError> {
        let count = self.cpu_count_checked(cpu, "kalloc");
        for step in 0..count {
            let victim = (cpu + step) % count;
            let Some(index) = self.cpus[victim].lock().pop(&self.links) else {
                continue;
            };
            if victim != cpu {
                debug!("kalloc: cpu {cpu} took page {index} from cpu {victim}");
            }
            return Ok(self.hand_out(index));
        }

        warn!("kalloc: out of memory on cpu {cpu}");
        Err(AllocError::OutOfMemory)
    }

    /// Return `page`, or drop one share of it.
    ///
    /// With copy-on-write tracking the page is only recycled once its count
    /// reaches zero; the junk fill happens after that, so a still shared page
    /// keeps its contents.
    ///
    /// # Panics
    /// If `page` is misaligned, outside the managed range, already free, or
    /// `cpu` is not a valid CPU index.
    pub fn free(&self, cpu: CpuId, page: Page) {
        self.cpu_count_checked(cpu, "kfree");
        let index = self.index_checked(page, "kfree");
        if !self.links.is_allocated(index) {
            error!("kfree: page {page} is already free");
            panic!("kfree: double free of {page}");
        }

        if let Some(refcounts) = &self.refcounts {
            let remaining = refcounts.adjust(index as usize, page, -1);
            if remaining > 0 {
                trace!("kfree: page {page} still has {remaining} owners");
                return;
            }
        }
        self.recycle(cpu, index);
    }

    /// Adjust the sharing count of an allocated page and return the new count.
    ///
    /// # Panics
    /// If copy-on-write tracking is off, the page is not managed, or the count
    /// would leave `0..=u16::MAX`.
    pub fn bump_refcount(&self, page: Page, delta: isize) -> u16 {
        let index = self.index_checked(page, "kref");
        self.refcounts_checked().adjust(index as usize, page, delta)
    }

    /// Record one more owner of `page`, as fork does for every page it maps
    /// copy-on-write. Returns the new count.
    ///
    /// # Panics
    /// As [`bump_refcount`](Self::bump_refcount).
    pub fn share(&self, page: Page) -> u16 {
        self.bump_refcount(page, 1)
    }

    /// Current sharing count, or `None` without copy-on-write tracking.
    ///
    /// # Panics
    /// If the page is not managed.
    #[must_use]
    pub fn refcount(&self, page: Page) -> Option<u16> {
        let index = self.index_checked(page, "kref");
        self.refcounts
            .as_ref()
            .map(|refcounts| refcounts.get(index as usize))
    }

    /// Decide where a write to `page` goes, allocating a fresh page on `cpu`
    /// if the page is shared. Neither page's count changes beyond the fresh
    /// page starting at one.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when a copy is needed and no page is free.
    ///
    /// # Panics
    /// If the page is not managed or not allocated.
    pub fn resolve_for_write(&self, cpu: CpuId, page: Page) -> Result<WriteTarget, AllocError> {
        let index = self.index_checked(page, "cow");
        let Some(refcounts) = &self.refcounts else {
            return Ok(WriteTarget::Exclusive(page));
        };

        match refcounts.get(index as usize) {
            0 => {
                error!("cow: write to free page {page}");
                panic!("cow: page {page} is not allocated");
            }
            1 => Ok(WriteTarget::Exclusive(page)),
            _ => Ok(WriteTarget::Copy {
                from: page,
                to: self.allocate(cpu)?,
            }),
        }
    }

    /// Complete copy-on-write step for one owner of `page`.
    ///
    /// Returns `page` itself when the caller is its only owner. Otherwise the
    /// contents are copied into a fresh page, the caller's share of `page` is
    /// dropped, and the fresh page is returned.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when a copy is needed and no page is free;
    /// `page` keeps its count then.
    ///
    /// # Panics
    /// As [`resolve_for_write`](Self::resolve_for_write).
    pub fn prepare_for_write(&self, cpu: CpuId, page: Page) -> Result<Page, AllocError> {
        match self.resolve_for_write(cpu, page)? {
            WriteTarget::Exclusive(page) => Ok(page),
            WriteTarget::Copy { from, to } => {
                // Safety: `to` is fresh and ours alone; `from` is shared but
                // copy-on-write pages are only ever read.
                unsafe {
                    ptr::copy_nonoverlapping(
                        self.memory.page_ptr(from).cast_const(),
                        self.memory.page_ptr(to),
                        1,
                    );
                }
                self.free(cpu, from);
                debug!("cow: copied {from} to {to} on cpu {cpu}");
                Ok(to)
            }
        }
    }

    /// Pages on `cpu`'s free list right now.
    ///
    /// # Panics
    /// If `cpu` is not a valid CPU index.
    #[must_use]
    pub fn free_pages(&self, cpu: CpuId) -> usize {
        self.cpu_count_checked(cpu, "kmem");
        self.cpus[cpu].lock().len()
    }

    /// Pages on all free lists. Only a snapshot while other CPUs are active.
    #[must_use]
    pub fn total_free(&self) -> usize {
        self.cpus.iter().map(|list| list.lock().len()).sum()
    }

    /// Walk every free list and cross-check it against the link words and
    /// sharing counts. Only meaningful while no other context uses the
    /// allocator.
    ///
    /// # Errors
    /// The first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), PageInvariantViolation> {
        let mut on_list = vec![false; self.pages as usize];

        for (cpu, list) in self.cpus.iter().enumerate() {
            let list = list.lock();
            let mut walked = 0;
            let mut index = list.head();
            while index != NIL {
                let page = self.page_at(index);
                if index >= self.pages || core::mem::replace(&mut on_list[index as usize], true) {
                    return Err(PageInvariantViolation::Relisted { page, cpu });
                }
                walked += 1;
                index = self.links.next(index);
            }
            if walked != list.len() {
                return Err(PageInvariantViolation::LengthMismatch {
                    cpu,
                    walked,
                    recorded: list.len(),
                });
            }
        }

        for index in 0..self.pages {
            let page = self.page_at(index);
            let free = on_list[index as usize];
            if free == self.links.is_allocated(index) {
                return Err(PageInvariantViolation::StateMismatch { page });
            }
            if let Some(refcounts) = &self.refcounts {
                let count = refcounts.get(index as usize);
                if free != (count == 0) {
                    return Err(PageInvariantViolation::CountMismatch { page, count });
                }
            }
        }
        Ok(())
    }

    /// Fill a page and put it on `cpu`'s list.
    fn recycle(&self, cpu: CpuId, index: u32) {
        let page = self.page_at(index);
        // Safety: the page is allocated and its last owner just let go.
        unsafe { ptr::write_bytes(self.memory.page_ptr(page), FREE_JUNK, 1) };
        if self.cpus[cpu].lock().push(&self.links, index).is_err() {
            error!("kfree: page {page} was freed concurrently");
            panic!("kfree: double free of {page}");
        }
    }

    fn hand_out(&self, index: u32) -> Page {
        let page = self.page_at(index);
        // Safety: the page was just taken off a free list.
        unsafe { ptr::write_bytes(self.memory.page_ptr(page), ALLOC_JUNK, 1) };

        if let Some(refcounts) = &self.refcounts {
            let previous = refcounts.replace(index as usize, 1);
            if previous != 0 {
                error!("kalloc: page {page} came off a free list with {previous} owners");
                panic!("kalloc: fresh page {page} has refcount {previous}");
            }
        }
        trace!("kalloc: page {page}");
        page
    }

    #[inline]
    fn page_at(&self, index: u32) -> Page {
        Page::from_raw(self.start.as_u64() + u64::from(index) * PAGE_SIZE as u64)
    }

    fn index_of(&self, page: Page) -> Option<u32> {
        if !page.is_aligned() || page.base().as_u64() < self.start.as_u64() {
            return None;
        }
        u32::try_from(page.index_from(self.start))
            .ok()
            .filter(|&index| index < self.pages)
    }

    fn index_checked(&self, page: Page, op: &str) -> u32 {
        if let Some(index) = self.index_of(page) {
            return index;
        }
        error!("{op}: page {page} is misaligned or not managed here");
        if page.is_aligned() {
            panic!("{op}: page {page} out of range");
        }
        panic!("{op}: page {page} is misaligned");
    }

    fn cpu_count_checked(&self, cpu: CpuId, op: &str) -> usize {
        let count = self.cpus.len();
        assert!(cpu < count, "{op}: cpu {cpu} out of range (have {count})");
        count
    }

    fn refcounts_checked(&self) -> &RefCounts {
        match &self.refcounts {
            Some(refcounts) => refcounts,
            None => panic!("kref: copy-on-write tracking is disabled"),
        }
    }
}

impl<M> fmt::Debug for PageAllocator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAllocator")
            .field("start", &self.start)
            .field("pages", &self.pages)
            .field("cpus", &self.cpus)
            .field("cow_tracking", &self.refcounts.is_some())
            .finish_non_exhaustive()
    }
}
