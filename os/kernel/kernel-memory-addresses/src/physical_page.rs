use crate::{PageSize, PhysicalAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical memory page base for size `S`.
///
/// A `PhysicalPage<S>` names one page of `S::SIZE` bytes by its base address.
/// It is the handle type the page allocator hands out and takes back.
///
/// ### Invariants
/// - Pages built through [`containing`](Self::containing) or
///   [`try_from_aligned`](Self::try_from_aligned) have their low `S::SHIFT`
///   bits cleared.
/// - [`from_raw`](Self::from_raw) skips that check; it exists for values read
///   back from hardware structures, and consumers that care (the allocator's
///   `free`) re-validate with [`is_aligned`](Self::is_aligned).
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let first = PhysicalPage::<Size4K>::containing(PhysicalAddress::new(0x8000_0FFF));
/// assert_eq!(first.base().as_u64(), 0x8000_0000);
/// assert_eq!(first.next().base().as_u64(), 0x8000_1000);
/// assert_eq!(first.next().index_from(first.base()), 1);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    value: u64,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self::from_raw(addr.as_u64() & !S::OFFSET_MASK)
    }

    /// Page starting exactly at `addr`, or `None` if `addr` is not aligned.
    #[inline]
    #[must_use]
    pub const fn try_from_aligned(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_aligned::<S>() {
            Some(Self::from_raw(addr.as_u64()))
        } else {
            None
        }
    }

    /// Wrap a raw value without checking its alignment.
    #[inline]
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self {
            value,
            _phantom: PhantomData,
        }
    }

    /// Return the base as a [`PhysicalAddress`].
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.value)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self) -> bool {
        self.base().is_aligned::<S>()
    }

    /// The page directly following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self::from_raw(self.value + S::SIZE)
    }

    /// Number of whole pages between `origin` and this page's base.
    ///
    /// `origin` must not lie above this page.
    #[inline]
    #[must_use]
    pub const fn index_from(self, origin: PhysicalAddress) -> u64 {
        (self.value - origin.as_u64()) >> S::SHIFT
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/{}", self.value, S::NAME)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(0x{:016X})", S::NAME, self.value)
    }
}
