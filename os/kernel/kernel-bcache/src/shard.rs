use crate::BlockId;
use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_sync::SpinLock;

/// Index of a buffer in the cache's slot table.
pub type SlotIndex = usize;

/// A buffer with at least one reference.
#[derive(Debug, Copy, Clone)]
pub struct Resident {
    pub slot: SlotIndex,
    pub id: BlockId,
    pub refcnt: u32,
}

/// A buffer nobody references. `id` is the block it still caches, if any.
#[derive(Debug, Copy, Clone)]
pub struct Idle {
    pub slot: SlotIndex,
    pub id: Option<BlockId>,
}

/// Everything a shard lock protects.
///
/// Both lists are ordered most recently used first.
#[derive(Debug, Default)]
pub struct ShardState {
    pub in_use: VecDeque<Resident>,
    pub free: VecDeque<Idle>,
}

impl ShardState {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            in_use: VecDeque::with_capacity(capacity),
            free: VecDeque::with_capacity(capacity),
        }
    }

    /// Buffers currently owned by the shard.
    #[inline]
    pub fn owned(&self) -> usize {
        self.in_use.len() + self.free.len()
    }

    /// Take a reference on the buffer caching `id`, wherever it sits.
    ///
    /// A hit on the free list revives the buffer with its identity, so the
    /// caller gets the cached payload without device I/O.
    pub fn acquire(&mut self, id: BlockId) -> Option<SlotIndex> {
        if let Some(pos) = self.in_use.iter().position(|r| r.id == id) {
            let mut resident = self.in_use.remove(pos)?;
            resident.refcnt += 1;
            self.in_use.push_front(resident);
            return Some(resident.slot);
        }

        let pos = self.free.iter().position(|i| i.id == Some(id))?;
        let idle = self.free.remove(pos)?;
        self.in_use.push_front(Resident {
            slot: idle.slot,
            id,
            refcnt: 1,
        });
        Some(idle.slot)
    }

    /// Take the least recently used idle buffer.
    #[inline]
    pub fn take_lru(&mut self) -> Option<Idle> {
        self.free.pop_back()
    }

    /// Bind `slot` to `id` with a single reference.
    pub fn install(&mut self, slot: SlotIndex, id: BlockId) {
        debug_assert!(self.in_use.iter().all(|r| r.id != id && r.slot != slot));
        self.in_use.push_front(Resident {
            slot,
            id,
            refcnt: 1,
        });
    }

    /// Keep a blank buffer on the free list, behind every buffer that still
    /// caches something.
    pub fn park(&mut self, slot: SlotIndex) {
        self.free.push_back(Idle { slot, id: None });
    }

    /// Add a reference to an already referenced buffer.
    ///
    /// # Panics
    /// If `slot` is not in use here.
    pub fn retain(&mut self, slot: SlotIndex) -> u32 {
        let resident = self.resident_mut(slot, "bpin");
        resident.refcnt += 1;
        resident.refcnt
    }

    /// Drop one reference; the last one moves the buffer to the front of the
    /// free list with its identity kept. Returns the remaining count.
    ///
    /// # Panics
    /// If `slot` is not in use here.
    pub fn release(&mut self, slot: SlotIndex, op: &str) -> u32 {
        let pos = self.position(slot, op);
        let resident = &mut self.in_use[pos];
        resident.refcnt -= 1;
        let remaining = resident.refcnt;
        if remaining == 0 {
            let id = resident.id;
            self.in_use.remove(pos);
            self.free.push_front(Idle { slot, id: Some(id) });
        }
        remaining
    }

    /// Reference count of the buffer caching `id`; `0` if it is idle here,
    /// `None` if the shard does not cache it.
    pub fn refcount(&self, id: BlockId) -> Option<u32> {
        if let Some(r) = self.in_use.iter().find(|r| r.id == id) {
            return Some(r.refcnt);
        }
        self.free.iter().any(|i| i.id == Some(id)).then_some(0)
    }

    fn resident_mut(&mut self, slot: SlotIndex, op: &str) -> &mut Resident {
        let pos = self.position(slot, op);
        &mut self.in_use[pos]
    }

    fn position(&self, slot: SlotIndex, op: &str) -> usize {
        let Some(pos) = self.in_use.iter().position(|r| r.slot == slot) else {
            log::error!("{op}: buffer {slot} is not referenced");
            panic!("{op}: buffer {slot} is not referenced");
        };
        assert!(
            self.in_use[pos].refcnt > 0,
            "{op}: buffer {slot} has no references"
        );
        pos
    }
}

/// A shard: its lock plus lock-free load hints for stealers.
#[derive(Debug)]
pub struct Shard {
    pub state: SpinLock<ShardState>,
    owned: AtomicUsize,
    idle: AtomicUsize,
}

impl Shard {
    pub fn new(state: ShardState) -> Self {
        let owned = AtomicUsize::new(state.owned());
        let idle = AtomicUsize::new(state.free.len());
        Self {
            state: SpinLock::named("bcache.shard", state),
            owned,
            idle,
        }
    }

    /// Refresh the load hints. Call with the shard lock held, after changing
    /// `state`.
    #[inline]
    pub fn publish(&self, state: &ShardState) {
        self.owned.store(state.owned(), Ordering::Relaxed);
        self.idle.store(state.free.len(), Ordering::Relaxed);
    }

    /// Buffers owned, as of the last [`publish`](Self::publish).
    #[inline]
    pub fn owned_hint(&self) -> usize {
        self.owned.load(Ordering::Relaxed)
    }

    /// Idle buffers, as of the last [`publish`](Self::publish).
    #[inline]
    pub fn idle_hint(&self) -> usize {
        self.idle.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(block: u32) -> BlockId {
        BlockId::new(1, block)
    }

    #[test]
    fn release_keeps_identity_on_the_free_list() {
        let mut state = ShardState::default();
        state.park(0);
        let idle = state.take_lru().unwrap();
        state.install(idle.slot, id(7));
        assert_eq!(state.release(0, "brelse"), 0);

        assert!(state.in_use.is_empty());
        assert_eq!(state.refcount(id(7)), Some(0));
        assert_eq!(state.acquire(id(7)), Some(0));
        assert_eq!(state.refcount(id(7)), Some(1));
    }

    #[test]
    fn free_list_is_most_recently_used_first() {
        let mut state = ShardState::default();
        for slot in 0..3 {
            state.install(slot, id(slot as u32));
        }
        state.release(1, "brelse");
        state.release(0, "brelse");
        state.release(2, "brelse");

        // Released last is used first; the first released is the LRU victim.
        assert_eq!(state.take_lru().map(|i| i.slot), Some(1));
        assert_eq!(state.free.front().map(|i| i.slot), Some(2));
    }

    #[test]
    fn parked_buffers_are_taken_before_cached_ones() {
        let mut state = ShardState::default();
        state.install(0, id(1));
        state.release(0, "brelse");
        state.park(1);
        assert_eq!(state.take_lru().map(|i| i.slot), Some(1));
    }

    #[test]
    fn retain_and_release_balance() {
        let mut state = ShardState::default();
        state.install(4, id(9));
        assert_eq!(state.retain(4), 2);
        assert_eq!(state.acquire(id(9)), Some(4));
        assert_eq!(state.release(4, "brelse"), 2);
        assert_eq!(state.release(4, "bunpin"), 1);
        assert_eq!(state.release(4, "brelse"), 0);
        assert_eq!(state.owned(), 1);
    }

    #[test]
    #[should_panic(expected = "brelse: buffer 3 is not referenced")]
    fn releasing_an_unreferenced_buffer_is_fatal() {
        let mut state = ShardState::default();
        state.park(3);
        state.release(3, "brelse");
    }
}
