//! # Kernel Resource Parameters
//!
//! This crate is the single source of truth for the compile-time shape of the
//! kernel's two fixed-size resource pools: the disk block cache and the
//! physical page allocator. Every subsystem that shares a pool boundary with
//! another one (the block device driver and the file-system layer agree on
//! [`BLOCK_SIZE`](params::BLOCK_SIZE), the virtual memory code and the page
//! allocator agree on [`PAGE_SIZE`](params::PAGE_SIZE)) reads its numbers from
//! here.
//!
//! ## Pools
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │        Block cache           │   │     Physical page allocator  │
//! │  NBUF buffers of BLOCK_SIZE  │   │  PAGE_SIZE pages, one free   │
//! │  split over NBUCKET shards   │   │  list per CPU (NCPU)         │
//! │  floor/ceiling per shard     │   │  junk-filled on alloc/free   │
//! └──────────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! The runtime pool constructors accept configuration structs whose defaults
//! are derived from these constants; the constants only fix the *default*
//! shape and the sizes that are part of an interface (block and page size).
//!
//! ## Compile-Time Checks
//!
//! Relationships between the constants are verified with `const` assertions,
//! so an inconsistent edit fails the build rather than the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod params;
