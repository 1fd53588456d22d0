//! # Virtual Memory Area Descriptors
//!
//! Memory-mapped regions (`mmap`) are described by [`VmArea`] records. The
//! kernel keeps a fixed pool of [`NVMA`](kernel_info::params::NVMA) of them
//! in a [`VmaCache`]; a process takes one per mapping and gives it back on
//! `munmap` or exit.
//!
//! ```rust
//! use kernel_vma::{MapFlags, Protection, VmaCache};
//!
//! let cache: VmaCache<u32> = VmaCache::new();
//! let mut vma = cache.get();
//! vma.addr = 0x4000_0000;
//! vma.length = 2 * 4096;
//! vma.prot = Protection::new().with_read(true).with_write(true);
//! vma.flags = MapFlags::new().with_shared(true);
//! vma.file = Some(7);
//! assert!(vma.writes_back());
//! assert_eq!(vma.file_offset(0x4000_1010), Some(0x1010));
//!
//! cache.put(vma);
//! assert_eq!(cache.available(), cache.capacity());
//! ```
//!
//! Running out of descriptors is treated like running out of cache buffers:
//! [`VmaCache::get`] panics with `vma_get: no free vmas`.
//! [`VmaCache::try_get`] exists for callers that can fail the `mmap` instead.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod area;
mod cache;

pub use area::{MapFlags, Protection, VmArea};
pub use cache::{Vma, VmaCache};
