use core::fmt;
use core::num::NonZeroUsize;

/// Identity of one execution context (a kernel thread, a process's kernel
/// half, or a host thread in tests).
///
/// Zero is reserved to mean "nobody", which lets lock owners be stored in a
/// plain atomic word.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContextId(NonZeroUsize);

impl ContextId {
    #[inline]
    #[must_use]
    pub const fn new(raw: NonZeroUsize) -> Self {
        Self(raw)
    }

    /// Build from a raw word; `None` for the reserved value zero.
    #[inline]
    #[must_use]
    pub const fn from_usize(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What the blocking primitives need from the scheduler.
///
/// Implemented by the kernel's process layer; the locks only ever call the
/// two associated functions, never store the type.
pub trait ExecContext {
    /// The context currently running on this processor.
    fn current() -> ContextId;

    /// Give the processor to another runnable context. Returns once this
    /// context is scheduled again.
    fn yield_now();
}

/// [`ExecContext`] backed by host threads.
///
/// Every thread receives a distinct id on first use; yielding maps to
/// [`std::thread::yield_now`].
#[cfg(feature = "std")]
#[derive(Debug, Copy, Clone, Default)]
pub struct ThreadContext;

#[cfg(feature = "std")]
impl ExecContext for ThreadContext {
    fn current() -> ContextId {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static NEXT: AtomicUsize = AtomicUsize::new(1);
        std::thread_local! {
            static ID: usize = NEXT.fetch_add(1, Ordering::Relaxed);
        }

        let raw = ID.with(|id| *id);
        ContextId::from_usize(raw).unwrap_or_else(|| unreachable!("context ids start at 1"))
    }

    fn yield_now() {
        std::thread::yield_now();
    }
}
