use core::fmt;
use core::hash::Hash;
use kernel_info::params::PAGE_SIZE;

mod sealed {
    pub trait Sealed {}
}

/// Page granularity known at the type level.
///
/// Sealed; the page allocator only deals in [`Size4K`].
pub trait PageSize:
    sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display
{
    /// Bytes per page; a power of two.
    const SIZE: u64;
    /// `log2(SIZE)`: number of offset bits below the page base.
    const SHIFT: u32 = Self::SIZE.trailing_zeros();
    /// Mask of the offset bits.
    const OFFSET_MASK: u64 = Self::SIZE - 1;
    /// Short name used when formatting pages.
    const NAME: &'static str;
}

/// The base page, [`PAGE_SIZE`] bytes.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u64 = PAGE_SIZE as u64;
    const NAME: &'static str = "4K";
}

impl fmt::Display for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Size4K({} bytes)", Self::SIZE)
    }
}

const _: () = {
    assert!(Size4K::SIZE.is_power_of_two());
    assert!(Size4K::SHIFT == 12);
};
