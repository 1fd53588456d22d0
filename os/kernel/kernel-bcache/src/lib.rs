//! # Sharded Disk Block Cache
//!
//! A fixed pool of [`NBUF`](kernel_info::params::NBUF) buffers caching disk
//! blocks, shared by every context that touches the disk. The cache is the
//! single synchronization point for a block: at most one context holds a
//! block's payload at any time, and a block is never cached twice.
//!
//! ## Interface
//!
//! * [`BlockCache::get`] returns a locked [`BufferGuard`] for `(device, block)`.
//! * [`BufferGuard::ensure_loaded`] reads the block from the device if the
//!   buffer does not hold it yet; [`BlockCache::read`] does both.
//! * [`BufferGuard::write_back`] writes the payload to the device.
//! * [`BufferGuard::release`] (or dropping the guard) gives the buffer back.
//! * [`BufferGuard::pin`] keeps the buffer resident after release, until the
//!   returned [`PinnedBlock`] is handed to [`BlockCache::unpin`].
//!
//! Do not keep guards longer than necessary: other contexts that want the same
//! block wait for it.
//!
//! ## Sharding
//!
//! ```text
//!              block % shards
//!   get(d, b) ───────────────▶ ┌─────────┐ ┌─────────┐     ┌─────────┐
//!                              │ shard 0 │ │ shard 1 │ ... │ shard n │
//!                              │ in-use  │ │ in-use  │     │ in-use  │
//!                              │ free    │ │ free    │     │ free    │
//!                              └────┬────┘ └────┬────┘     └────┬────┘
//!                                   │  spill / refill (bounded) │
//!                                   ▼                           ▼
//!                              ┌──────────────────────────────────┐
//!                              │          global reserve          │
//!                              └──────────────────────────────────┘
//! ```
//!
//! Each shard owns a spin lock, an MRU-ordered in-use list and an MRU-ordered
//! free list. A shard starts with `shard_floor` blank buffers; the rest of the
//! pool sits in the global reserve. A miss is served, in order, from the
//! shard's own free list, from the reserve (while the shard owns fewer than
//! `shard_ceiling` buffers), or by stealing the least recently used idle buffer
//! of the least loaded peer shard. Peers at their floor are only robbed once
//! neither a peer above its floor nor the reserve has anything left. Releasing the last reference parks the
//! buffer, identity and payload intact, on its shard's free list; a later
//! lookup of the same block finds it there without device I/O.
//!
//! ## Lock Discipline
//!
//! * At most one shard lock is held at any time. Stealing drops the home shard
//!   lock, visits peers one by one, then re-acquires the home shard and
//!   repeats the lookup.
//! * The reserve lock is a leaf: it is taken inside a shard lock or alone,
//!   never the other way round.
//! * Device I/O and payload (sleep) locking only happen with no spin lock
//!   held.
//!
//! ## Failure Model
//!
//! Device errors are returned as [`BlockCacheError`]. Running out of idle
//! buffers everywhere is a capacity bug, not a transient condition, and
//! panics with `bget: no buffers`; so do precondition violations such as
//! writing back a buffer the caller does not hold.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod buffer;
mod cache;
mod config;
mod device;
mod error;
mod invariants;
mod shard;
mod stats;

pub use buffer::{BufferGuard, PinnedBlock};
pub use cache::BlockCache;
pub use config::BlockCacheConfig;
pub use device::{BlockDevice, RamDisk};
pub use error::{BlockCacheError, ConfigError, DeviceError};
pub use invariants::{InvariantViolation, SlotLocation};
pub use stats::{CacheStats, ShardLoad};

use core::fmt;
use kernel_info::params::BLOCK_SIZE;

/// Device identifier as understood by the block driver.
pub type DeviceId = u32;

/// Block number on a device.
pub type BlockNo = u32;

/// Payload of one cached block.
pub type Block = [u8; BLOCK_SIZE];

/// Identity of a cached block.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId {
    pub device: DeviceId,
    pub block: BlockNo,
}

impl BlockId {
    #[inline]
    #[must_use]
    pub const fn new(device: DeviceId, block: BlockNo) -> Self {
        Self { device, block }
    }

    /// Shard owning this block in a cache with `shards` shards.
    #[inline]
    #[must_use]
    pub const fn shard(self, shards: usize) -> usize {
        self.block as usize % shards
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.device, self.block)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.block)
    }
}
