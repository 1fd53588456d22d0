use crate::Page;
use alloc::boxed::Box;
use alloc::vec;
use kernel_sync::SpinLock;
use log::error;

/// Copy-on-write sharing counts, one per managed page, behind one lock.
///
/// A free page counts zero, a page owned by one address space counts one, a
/// page shared by `k` address spaces counts `k`.
pub(crate) struct RefCounts {
    counts: SpinLock<Box<[u16]>>,
}

impl RefCounts {
    pub fn new(pages: usize) -> Self {
        Self {
            counts: SpinLock::named("kref", vec![0; pages].into_boxed_slice()),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> u16 {
        self.counts.lock()[index]
    }

    /// Overwrite a count; returns the previous value.
    pub fn replace(&self, index: usize, value: u16) -> u16 {
        core::mem::replace(&mut self.counts.lock()[index], value)
    }

    /// Add `delta` to the count of `page` and return the result.
    ///
    /// # Panics
    /// If the count would drop below zero or exceed `u16::MAX`.
    pub fn adjust(&self, index: usize, page: Page, delta: isize) -> u16 {
        let mut counts = self.counts.lock();
        let current = counts[index];
        let updated = isize::try_from(current)
            .ok()
            .and_then(|c| c.checked_add(delta))
            .and_then(|c| u16::try_from(c).ok());
        let Some(updated) = updated else {
            drop(counts);
            error!("kref: count {current} of page {page} cannot change by {delta}");
            panic!("kref: refcount of {page} out of range ({current} {delta:+})");
        };
        counts[index] = updated;
        updated
    }
}
