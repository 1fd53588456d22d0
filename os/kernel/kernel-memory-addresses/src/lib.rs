//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for physical addresses and page bases, used as the
//! page handles of the physical page allocator.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address (RAM or MMIO). |
//! | [`PhysicalPage<S>`] | The base address of a physical page of size `S`. |
//! | [`PageSize`] | Marker trait providing [`SIZE`](PageSize::SIZE) and [`SHIFT`](PageSize::SHIFT). |
//!
//! Only the base granularity [`Size4K`] is provided; the page allocator never
//! hands out larger pages.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x8000_2042);
//! let page = pa.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0x8000_2000);
//! assert!(!pa.is_aligned::<Size4K>());
//!
//! // A page handle only exists for aligned addresses when built checked.
//! assert!(PhysicalPage::<Size4K>::try_from_aligned(pa).is_none());
//! assert_eq!(PhysicalPage::<Size4K>::try_from_aligned(page.base()), Some(page));
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord` and
//!   `Hash`, so they can serve as map keys and cross FFI boundaries.
//! - All alignment calculations are `const fn`.
//! - The phantom marker `S` fixes the page size at the type level.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod page_size;
mod physical_address;
mod physical_page;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
