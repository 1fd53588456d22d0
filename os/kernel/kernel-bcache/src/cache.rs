use crate::buffer::Slot;
use crate::shard::{Shard, ShardState, SlotIndex};
use crate::stats::Counters;
use crate::{
    BlockCacheConfig, BlockCacheError, BlockDevice, BlockId, BlockNo, BufferGuard, CacheStats,
    ConfigError, DeviceId, PinnedBlock, ShardLoad,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::fmt;
use core::hint::spin_loop;
use core::iter;
use core::sync::atomic::Ordering;
use kernel_sync::{ExecContext, SpinLock};
use log::{debug, error, info, trace};

/// The buffer cache. See the [crate documentation](crate) for the policy.
///
/// `D` is the device below the cache, `C` the execution context model used
/// by the per-buffer sleep locks.
pub struct BlockCache<D, C> {
    pub(crate) config: BlockCacheConfig,
    device: D,
    pub(crate) slots: Box<[Slot<C>]>,
    pub(crate) shards: Box<[Shard]>,
    /// Blank buffers owned by no shard. Leaf lock.
    pub(crate) reserve: SpinLock<Vec<SlotIndex>>,
    counters: Counters,
}

impl<D: BlockDevice, C: ExecContext> BlockCache<D, C> {
    /// Build the pool: `shard_floor` blank buffers per shard, the rest in the
    /// reserve.
    ///
    /// # Errors
    /// If `config` is inconsistent.
    pub fn new(device: D, config: BlockCacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let slots: Box<[Slot<C>]> = (0..config.buffers).map(|_| Slot::new()).collect();

        let mut next: SlotIndex = 0;
        let shards: Box<[Shard]> = (0..config.shards)
            .map(|_| {
                let mut state = ShardState::with_capacity(config.shard_ceiling);
                for slot in next..next + config.shard_floor {
                    state.park(slot);
                }
                next += config.shard_floor;
                Shard::new(state)
            })
            .collect();

        let mut reserve = Vec::with_capacity(config.buffers);
        reserve.extend(next..config.buffers);

        info!(
            "bcache: {} buffers in {} shards (floor {}, ceiling {}), {} in reserve",
            config.buffers,
            config.shards,
            config.shard_floor,
            config.shard_ceiling,
            reserve.len()
        );

        Ok(Self {
            config,
            device,
            slots,
            shards,
            reserve: SpinLock::named("bcache.reserve", reserve),
            counters: Counters::default(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &BlockCacheConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Locked buffer for `(device, block)`; the payload is only current after
    /// [`BufferGuard::ensure_loaded`].
    ///
    /// Waits while another context holds the same block.
    ///
    /// # Panics
    /// If every buffer of the pool is referenced.
    pub fn get(&self, device: DeviceId, block: BlockNo) -> BufferGuard<'_, D, C> {
        let id = BlockId::new(device, block);
        let slot = self.claim(id);
        // No spin lock is held here; waiting for the payload may take a while.
        let data = self.slots[slot].data.lock();
        BufferGuard::new(self, slot, id, data)
    }

    /// Locked buffer for `(device, block)` with the payload read from the
    /// device if needed.
    ///
    /// # Errors
    /// The device error; the buffer is released again in that case.
    ///
    /// # Panics
    /// If every buffer of the pool is referenced.
    pub fn read(
        &self,
        device: DeviceId,
        block: BlockNo,
    ) -> Result<BufferGuard<'_, D, C>, BlockCacheError> {
        let mut buf = self.get(device, block);
        buf.ensure_loaded()?;
        Ok(buf)
    }

    /// Drop the reference taken by [`BufferGuard::pin`].
    pub fn unpin(&self, pin: PinnedBlock) {
        self.release_as(pin.slot, pin.id, "bunpin");
    }

    /// Whether some buffer currently caches `(device, block)`.
    #[must_use]
    pub fn contains(&self, device: DeviceId, block: BlockNo) -> bool {
        self.refcount(device, block).is_some()
    }

    /// References held on the buffer caching `(device, block)`.
    #[must_use]
    pub fn refcount(&self, device: DeviceId, block: BlockNo) -> Option<u32> {
        let id = BlockId::new(device, block);
        self.shard_for(id).state.lock().refcount(id)
    }

    /// Per-shard buffer counts, in shard order.
    #[must_use]
    pub fn shard_loads(&self) -> Vec<ShardLoad> {
        self.shards
            .iter()
            .map(|shard| {
                let state = shard.state.lock();
                ShardLoad {
                    owned: state.owned(),
                    idle: state.free.len(),
                }
            })
            .collect()
    }

    /// Buffers currently in the global reserve.
    #[must_use]
    pub fn reserve_len(&self) -> usize {
        self.reserve.lock().len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let contention = self
            .shards
            .iter()
            .map(|s| s.state.contention_count())
            .sum();
        self.counters.snapshot(contention)
    }

    #[inline]
    pub(crate) fn slot(&self, slot: SlotIndex) -> &Slot<C> {
        &self.slots[slot]
    }

    #[inline]
    pub(crate) const fn counters(&self) -> &Counters {
        &self.counters
    }

    #[inline]
    fn shard_for(&self, id: BlockId) -> &Shard {
        &self.shards[id.shard(self.shards.len())]
    }

    pub(crate) fn retain(&self, slot: SlotIndex, id: BlockId) {
        let mut state = self.shard_for(id).state.lock();
        let refcnt = state.retain(slot);
        trace!("bpin: {id} in buffer {slot} now has {refcnt} references");
    }

    pub(crate) fn release(&self, slot: SlotIndex, id: BlockId) {
        self.release_as(slot, id, "brelse");
    }

    fn release_as(&self, slot: SlotIndex, id: BlockId, op: &str) {
        let shard = self.shard_for(id);
        let mut state = shard.state.lock();
        if state.release(slot, op) == 0 {
            self.spill_excess(&mut state);
        }
        shard.publish(&state);
    }

    /// Hand LRU idle buffers to the reserve while the shard is above its
    /// ceiling.
    fn spill_excess(&self, state: &mut ShardState) {
        while state.owned() > self.config.shard_ceiling {
            let Some(idle) = state.take_lru() else {
                return;
            };
            self.slots[idle.slot].valid.store(false, Ordering::Release);
            self.reserve.lock().push(idle.slot);
            Counters::bump(&self.counters.spills);
            debug!("bcache: spilled buffer {} to the reserve", idle.slot);
        }
    }

    /// Reference the buffer for `id`, rebinding an idle one on a miss.
    fn claim(&self, id: BlockId) -> SlotIndex {
        let home = id.shard(self.shards.len());
        let shard = &self.shards[home];

        {
            let mut state = shard.state.lock();
            if let Some(slot) = state.acquire(id) {
                shard.publish(&state);
                Counters::bump(&self.counters.hits);
                trace!("bget: {id} hit in buffer {slot}");
                return slot;
            }

            Counters::bump(&self.counters.misses);
            if let Some(slot) = self.refill(&mut state) {
                self.bind(&mut state, slot, id);
                shard.publish(&state);
                return slot;
            }
        }

        let stolen = self.steal(home, id);

        let mut state = shard.state.lock();
        let slot = if let Some(slot) = state.acquire(id) {
            // Cached by someone else while the shard was unlocked.
            state.park(stolen);
            self.spill_excess(&mut state);
            slot
        } else {
            self.bind(&mut state, stolen, id);
            stolen
        };
        shard.publish(&state);
        slot
    }

    /// An idle buffer for a shard without going to its peers.
    fn refill(&self, state: &mut ShardState) -> Option<SlotIndex> {
        if let Some(idle) = state.take_lru() {
            return Some(idle.slot);
        }
        if state.owned() < self.config.shard_ceiling {
            return self.reserve.lock().pop();
        }
        None
    }

    fn bind(&self, state: &mut ShardState, slot: SlotIndex, id: BlockId) {
        self.slots[slot].valid.store(false, Ordering::Release);
        state.install(slot, id);
        trace!("bget: {id} miss, bound to buffer {slot}");
    }

    /// Take an idle buffer from some other shard. Called with no shard lock
    /// held.
    fn steal(&self, home: usize, id: BlockId) -> SlotIndex {
        let count = self.shards.len();
        let mut victims: Vec<usize> = (1..count).map(|d| (home + d) % count).collect();
        // Stable: equally idle shards keep the ring order after `home`.
        victims.sort_by_key(|&s| Reverse(self.shards[s].idle_hint()));

        for &victim in &victims {
            let shard = &self.shards[victim];
            if shard.idle_hint() == 0 || shard.owned_hint() <= self.config.shard_floor {
                continue;
            }
            if let Some(slot) = self.take_from(victim, true) {
                return slot;
            }
        }

        if let Some(slot) = self.take_reserve(home) {
            debug!("bget: {id} took buffer {slot} from the reserve above the ceiling");
            return slot;
        }

        // Floors no longer count. Buffers can move between shards while they
        // are visited one at a time, so sweep until none is idle anywhere.
        loop {
            for &victim in victims.iter().chain(iter::once(&home)) {
                if let Some(slot) = self.take_from(victim, false) {
                    return slot;
                }
            }
            if let Some(slot) = self.take_reserve(home) {
                return slot;
            }
            if !self.any_idle() {
                break;
            }
            spin_loop();
        }

        error!("bget: no idle buffer left for {id}");
        panic!("bget: no buffers");
    }

    /// Pop the reserve under the home shard's lock, ignoring the ceiling.
    fn take_reserve(&self, home: usize) -> Option<SlotIndex> {
        let _home = self.shards[home].state.lock();
        self.reserve.lock().pop()
    }

    fn any_idle(&self) -> bool {
        self.shards.iter().any(|s| s.idle_hint() > 0) || !self.reserve.lock().is_empty()
    }

    fn take_from(&self, victim: usize, respect_floor: bool) -> Option<SlotIndex> {
        let shard = &self.shards[victim];
        let mut state = shard.state.lock();
        if respect_floor && state.owned() <= self.config.shard_floor {
            return None;
        }
        let idle = state.take_lru()?;
        self.slots[idle.slot].valid.store(false, Ordering::Release);
        shard.publish(&state);
        drop(state);

        Counters::bump(&self.counters.steals);
        debug!(
            "bget: took buffer {} from shard {victim} (was {:?})",
            idle.slot, idle.id
        );
        Some(idle.slot)
    }
}

impl<D, C> fmt::Debug for BlockCache<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("config", &self.config)
            .field("shards", &self.shards)
            .field("reserve", &self.reserve)
            .finish_non_exhaustive()
    }
}
