use crate::{ContextId, ExecContext};
use core::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Long-term lock that yields the processor while waiting.
///
/// Unlike [`SpinLock`](crate::SpinLock), a waiter hands its processor back to
/// the scheduler through `C::yield_now` on every failed attempt, so holding a
/// `SleepLock` across device I/O is fine. The lock remembers which
/// [`ContextId`] holds it, which backs [`holding`](Self::holding).
///
/// A `SleepLock` must never be acquired while a spin lock is held.
pub struct SleepLock<T, C> {
    name: &'static str,
    locked: AtomicBool,
    /// Raw [`ContextId`] of the holder, or zero.
    holder: AtomicUsize,
    inner: UnsafeCell<T>,
    _ctx: PhantomData<fn() -> C>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send, C> Sync for SleepLock<T, C> {}
unsafe impl<T: Send, C> Send for SleepLock<T, C> {}

impl<T, C: ExecContext> SleepLock<T, C> {
    pub const fn new(name: &'static str, inner: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            holder: AtomicUsize::new(0),
            inner: UnsafeCell::new(inner),
            _ctx: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock, yielding the current context while it is held elsewhere.
    ///
    /// # Panics
    /// If the current context already holds this lock; it would wait forever.
    pub fn lock(&self) -> SleepLockGuard<'_, T, C> {
        let me = C::current();
        loop {
            if let Some(guard) = self.try_lock_as(me) {
                return guard;
            }
            assert!(
                self.holder.load(Ordering::Relaxed) != me.as_usize(),
                "{}: sleep lock re-acquired by its holder",
                self.name
            );
            C::yield_now();
        }
    }

    /// Try once; returns immediately.
    pub fn try_lock(&self) -> Option<SleepLockGuard<'_, T, C>> {
        self.try_lock_as(C::current())
    }

    fn try_lock_as(&self, me: ContextId) -> Option<SleepLockGuard<'_, T, C>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.holder.store(me.as_usize(), Ordering::Relaxed);
            Some(SleepLockGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Whether the **current** context holds this lock.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Acquire)
            && self.holder.load(Ordering::Relaxed) == C::current().as_usize()
    }

    /// Whether any context holds this lock. Only a snapshot.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T, C> fmt::Debug for SleepLock<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("holder", &ContextId::from_usize(self.holder.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

/// Proof that the current context holds a [`SleepLock`].
///
/// The guard is `!Send`: the holder recorded in the lock is the context that
/// acquired it, and the guard must be dropped by that same context.
pub struct SleepLockGuard<'a, T, C: ExecContext> {
    lock: &'a SleepLock<T, C>,
    _not_send: PhantomData<*const ()>,
}

impl<T, C: ExecContext> SleepLockGuard<'_, T, C> {
    /// Re-checks ownership against the lock itself.
    #[inline]
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    #[inline]
    #[must_use]
    pub fn lock_name(&self) -> &'static str {
        self.lock.name
    }
}

impl<T, C: ExecContext> Deref for SleepLockGuard<'_, T, C> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T, C: ExecContext> DerefMut for SleepLockGuard<'_, T, C> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T, C: ExecContext> Drop for SleepLockGuard<'_, T, C> {
    fn drop(&mut self) {
        self.lock.holder.store(0, Ordering::Relaxed);
        self.lock.locked.store(false, Ordering::Release);
    }
}
