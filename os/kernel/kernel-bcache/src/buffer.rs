use crate::shard::SlotIndex;
use crate::stats::Counters;
use crate::{Block, BlockCache, BlockCacheError, BlockDevice, BlockId, BlockNo, DeviceId};
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::params::BLOCK_SIZE;
use kernel_sync::{ExecContext, SleepLock, SleepLockGuard};

/// One buffer of the pool.
///
/// Which block the buffer caches lives in the shard lists; the slot itself
/// only carries the payload and whether the payload is current.
pub struct Slot<C> {
    /// Payload mirrors the device. Cleared under the owning shard lock when
    /// the buffer is rebound, set under the payload lock after a read.
    pub valid: AtomicBool,
    pub data: SleepLock<Block, C>,
}

impl<C: ExecContext> Slot<C> {
    pub const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            data: SleepLock::new("buffer", [0; BLOCK_SIZE]),
        }
    }
}

/// Exclusive access to a cached block.
///
/// The guard holds the buffer's sleep lock and one reference. Dropping it, or
/// calling [`release`](Self::release), gives both back.
pub struct BufferGuard<'a, D: BlockDevice, C: ExecContext> {
    cache: &'a BlockCache<D, C>,
    slot: SlotIndex,
    id: BlockId,
    data: Option<SleepLockGuard<'a, Block, C>>,
}

impl<'a, D: BlockDevice, C: ExecContext> BufferGuard<'a, D, C> {
    pub(crate) const fn new(
        cache: &'a BlockCache<D, C>,
        slot: SlotIndex,
        id: BlockId,
        data: SleepLockGuard<'a, Block, C>,
    ) -> Self {
        Self {
            cache,
            slot,
            id,
            data: Some(data),
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.id.device
    }

    #[inline]
    #[must_use]
    pub const fn block(&self) -> BlockNo {
        self.id.block
    }

    /// Index of the underlying buffer in the pool. Two guards (held one after
    /// the other) with the same index used the same buffer.
    #[inline]
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the payload currently mirrors the device.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.slot).valid.load(Ordering::Acquire)
    }

    /// Read the block from the device unless the buffer already holds it.
    ///
    /// # Errors
    /// The device error, in which case the payload stays invalid and a later
    /// call retries the read.
    pub fn ensure_loaded(&mut self) -> Result<(), BlockCacheError> {
        let cache = self.cache;
        let slot = cache.slot(self.slot);
        if slot.valid.load(Ordering::Acquire) {
            return Ok(());
        }

        let id = self.id;
        cache.device().read_block(id, self.payload_mut())?;
        slot.valid.store(true, Ordering::Release);
        Counters::bump(&cache.counters().reads);
        log::trace!("bread: {id} -> buffer {}", self.slot);
        Ok(())
    }

    /// Write the payload to the device.
    ///
    /// The payload counts as current afterwards, whether or not it was read
    /// first.
    ///
    /// # Errors
    /// The device error.
    ///
    /// # Panics
    /// If the current context does not hold the buffer's lock.
    pub fn write_back(&self) -> Result<(), BlockCacheError> {
        let data = self.payload_guard("bwrite");
        assert!(data.holding(), "bwrite: not holding buffer lock");
        self.cache.device().write_block(self.id, data)?;
        self.cache.slot(self.slot).valid.store(true, Ordering::Release);
        Counters::bump(&self.cache.counters().writes);
        log::trace!("bwrite: buffer {} -> {}", self.slot, self.id);
        Ok(())
    }

    /// Keep the buffer bound to its block beyond this guard, e.g. while a log
    /// commit still refers to it.
    #[must_use = "a pin never handed to BlockCache::unpin keeps the buffer resident forever"]
    pub fn pin(&self) -> PinnedBlock {
        self.cache.retain(self.slot, self.id);
        PinnedBlock {
            slot: self.slot,
            id: self.id,
        }
    }

    /// Give the buffer back. Same as dropping the guard.
    #[inline]
    pub fn release(self) {
        drop(self);
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &Block {
        self.payload_guard("bdata")
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut Block {
        self.payload_mut()
    }

    fn payload_guard(&self, op: &str) -> &SleepLockGuard<'a, Block, C> {
        match &self.data {
            Some(data) => data,
            None => panic!("{op}: buffer {} already released", self.slot),
        }
    }

    fn payload_mut(&mut self) -> &mut Block {
        match &mut self.data {
            Some(data) => &mut **data,
            None => panic!("buffer {} already released", self.slot),
        }
    }
}

impl<D: BlockDevice, C: ExecContext> Deref for BufferGuard<'_, D, C> {
    type Target = Block;

    fn deref(&self) -> &Block {
        self.data()
    }
}

impl<D: BlockDevice, C: ExecContext> DerefMut for BufferGuard<'_, D, C> {
    fn deref_mut(&mut self) -> &mut Block {
        self.data_mut()
    }
}

impl<D: BlockDevice, C: ExecContext> Drop for BufferGuard<'_, D, C> {
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        if !data.holding() {
            log::error!("brelse: not holding buffer lock for {}", self.id);
            panic!("brelse: not holding buffer lock");
        }

        // Payload lock before shard lock.
        drop(data);
        self.cache.release(self.slot, self.id);
    }
}

impl<D: BlockDevice, C: ExecContext> fmt::Debug for BufferGuard<'_, D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// An extra reference on a buffer, taken by [`BufferGuard::pin`].
///
/// While it exists the buffer stays bound to its block and is never evicted.
/// Hand it to [`BlockCache::unpin`] to drop the reference.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pinned buffer stays resident until passed to BlockCache::unpin"]
pub struct PinnedBlock {
    pub(crate) slot: SlotIndex,
    pub(crate) id: BlockId,
}

impl PinnedBlock {
    #[inline]
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }
}
