use crate::VmArea;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr;
use kernel_info::params::NVMA;
use kernel_sync::SpinLock;
use log::{error, trace};

/// Fixed pool of [`VmArea`] descriptors.
///
/// Free descriptors sit on a stack; the most recently returned one is handed
/// out next. Only the stack is locked: a descriptor taken from it belongs to
/// its [`Vma`] handle alone.
pub struct VmaCache<F> {
    areas: Box<[UnsafeCell<VmArea<F>>]>,
    free: SpinLock<Vec<usize>>,
}

// Safety: a descriptor is reachable either through the locked free stack
// (and then never dereferenced) or through exactly one `Vma` handle.
unsafe impl<F: Send> Sync for VmaCache<F> {}
unsafe impl<F: Send> Send for VmaCache<F> {}

impl<F> VmaCache<F> {
    /// A cache with [`NVMA`] descriptors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(NVMA)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            areas: (0..capacity)
                .map(|_| UnsafeCell::new(VmArea::default()))
                .collect(),
            free: SpinLock::named("vmacache", (0..capacity).rev().collect()),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.areas.len()
    }

    /// Descriptors currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Take a blank descriptor.
    ///
    /// # Panics
    /// If every descriptor is in use.
    pub fn get(&self) -> Vma<'_, F> {
        match self.try_get() {
            Some(vma) => vma,
            None => {
                error!("vma_get: all {} descriptors in use", self.capacity());
                panic!("vma_get: no free vmas");
            }
        }
    }

    /// Take a blank descriptor, if one is free.
    pub fn try_get(&self) -> Option<Vma<'_, F>> {
        let index = self.free.lock().pop()?;
        trace!("vma_get: descriptor {index}");
        Some(Vma {
            cache: self,
            index,
            _not_sync: PhantomData,
        })
    }

    /// Return a descriptor. Same as dropping the handle.
    ///
    /// # Panics
    /// If `vma` came from a different cache.
    pub fn put(&self, vma: Vma<'_, F>) {
        assert!(
            ptr::eq(vma.cache, self),
            "vma_put: descriptor {} belongs to another cache",
            vma.index
        );
        drop(vma);
    }

    fn recycle(&self, index: usize) {
        // Safety: called from the handle's drop; the handle was the only
        // access path to this descriptor.
        let area = unsafe { &mut *self.areas[index].get() };
        // Drops the file reference, if any.
        *area = VmArea::default();
        self.free.lock().push(index);
        trace!("vma_put: descriptor {index}");
    }
}

impl<F> Default for VmaCache<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> fmt::Debug for VmaCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmaCache")
            .field("capacity", &self.capacity())
            .field("free", &self.free)
            .finish()
    }
}

/// Exclusive handle to a descriptor taken from a [`VmaCache`].
///
/// Dereferences to the [`VmArea`]. Dropping the handle blanks the descriptor
/// and returns it to the cache.
///
/// A handle is shared between threads only if the file reference is:
///
/// ```compile_fail
/// use core::cell::Cell;
/// use kernel_vma::{Vma, VmaCache};
///
/// fn share<T: Sync>(_: &T) {}
///
/// let cache: VmaCache<Cell<u32>> = VmaCache::with_capacity(1);
/// share(&cache.get());
/// ```
pub struct Vma<'a, F> {
    cache: &'a VmaCache<F>,
    index: usize,
    _not_sync: PhantomData<*const ()>,
}

// Safety: the handle owns its descriptor; moving it moves the `F` with it.
unsafe impl<F: Send> Send for Vma<'_, F> {}
// Safety: a shared handle only hands out `&VmArea<F>`.
unsafe impl<F: Sync> Sync for Vma<'_, F> {}

impl<F> Vma<'_, F> {
    /// Position of the descriptor in its cache.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<F> Deref for Vma<'_, F> {
    type Target = VmArea<F>;

    fn deref(&self) -> &VmArea<F> {
        // Safety: the handle is the only access path while it lives.
        unsafe { &*self.cache.areas[self.index].get() }
    }
}

impl<F> DerefMut for Vma<'_, F> {
    fn deref_mut(&mut self) -> &mut VmArea<F> {
        // Safety: the handle is the only access path while it lives.
        unsafe { &mut *self.cache.areas[self.index].get() }
    }
}

impl<F> Drop for Vma<'_, F> {
    fn drop(&mut self) {
        self.cache.recycle(self.index);
    }
}

impl<F: fmt::Debug> fmt::Debug for Vma<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vma")
            .field("index", &self.index)
            .field("area", &**self)
            .finish()
    }
}
