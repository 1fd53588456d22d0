use core::sync::atomic::{AtomicUsize, Ordering};

/// Running counters, bumped without any lock.
#[derive(Debug, Default)]
pub struct Counters {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub steals: AtomicUsize,
    pub spills: AtomicUsize,
}

impl Counters {
    #[inline]
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, shard_contention: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            device_reads: self.reads.load(Ordering::Relaxed),
            device_writes: self.writes.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            spills: self.spills.load(Ordering::Relaxed),
            shard_contention,
        }
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a buffer already caching the block.
    pub hits: usize,
    /// Lookups that had to rebind a buffer.
    pub misses: usize,
    /// Blocks read from the device.
    pub device_reads: usize,
    /// Blocks written to the device.
    pub device_writes: usize,
    /// Buffers taken from a peer shard.
    pub steals: usize,
    /// Buffers returned to the reserve by a shard above its ceiling.
    pub spills: usize,
    /// Shard lock acquisitions that found the lock taken, summed over shards.
    pub shard_contention: usize,
}

impl CacheStats {
    /// Lookups of any kind.
    #[inline]
    #[must_use]
    pub const fn lookups(&self) -> usize {
        self.hits + self.misses
    }
}

/// Buffers held by one shard.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ShardLoad {
    pub owned: usize,
    pub idle: usize,
}
