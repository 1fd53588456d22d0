use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

/// Link word of the last page on a list.
pub(crate) const NIL: u32 = u32::MAX;

/// Link word of a page that is on no list.
pub(crate) const ALLOCATED: u32 = u32::MAX - 1;

/// Largest number of pages one allocator can manage.
pub(crate) const MAX_PAGES: u32 = ALLOCATED;

/// One link word per managed page, shared by every per-CPU list.
///
/// A page's word is [`ALLOCATED`] while the page is handed out and the index
/// of its successor (or [`NIL`]) while it sits on a free list:
///
/// ```text
///  index:   0      1      2      3      4      5
///  link:  [ 3 ] [ A ] [ NIL] [ 5 ] [ A ] [ NIL]
///           ▲                  ▲
///  cpu 0 ───┘ 0 → 3 → 5        │
///  cpu 1 ──── 2                (A = ALLOCATED)
/// ```
///
/// Lists are protected by their CPU's lock, but the words are atomic so that
/// taking a page onto a list is a single compare-exchange against
/// `ALLOCATED`. A page freed twice fails that exchange no matter which CPU's
/// list already holds it.
pub(crate) struct Links {
    words: Box<[AtomicU32]>,
}

impl Links {
    /// All pages start out allocated.
    pub fn new(pages: u32) -> Self {
        Self {
            words: (0..pages).map(|_| AtomicU32::new(ALLOCATED)).collect(),
        }
    }

    #[inline]
    pub fn is_allocated(&self, index: u32) -> bool {
        self.words[index as usize].load(Ordering::Acquire) == ALLOCATED
    }

    #[inline]
    pub fn next(&self, index: u32) -> u32 {
        self.words[index as usize].load(Ordering::Acquire)
    }
}

/// A page was pushed while it already sat on a free list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct AlreadyFree;

/// LIFO stack of page indices threaded through [`Links`].
///
/// # Invariants
/// - `len` equals the number of pages reachable from `head`.
/// - Every page reachable from `head` has a link word other than `ALLOCATED`.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: u32,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { head: NIL, len: 0 }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn head(&self) -> u32 {
        self.head
    }

    /// Put `index` on top of the stack.
    ///
    /// # Errors
    /// [`AlreadyFree`] if the page is on some list already; nothing changes.
    pub fn push(&mut self, links: &Links, index: u32) -> Result<(), AlreadyFree> {
        links.words[index as usize]
            .compare_exchange(ALLOCATED, self.head, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AlreadyFree)?;
        self.head = index;
        self.len += 1;
        Ok(())
    }

    /// Take the most recently pushed page.
    pub fn pop(&mut self, links: &Links) -> Option<u32> {
        if self.head == NIL {
            return None;
        }
        let index = self.head;
        self.head = links.words[index as usize].swap(ALLOCATED, Ordering::AcqRel);
        self.len -= 1;
        Some(index)
    }
}
