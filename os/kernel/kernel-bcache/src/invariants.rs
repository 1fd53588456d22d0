use crate::shard::SlotIndex;
use crate::{BlockCache, BlockDevice, BlockId, ShardLoad};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use kernel_sync::ExecContext;

/// Where the bookkeeping found a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotLocation {
    InUse { shard: usize },
    Free { shard: usize },
    Reserve,
}

/// A broken cache invariant, as found by [`BlockCache::check_invariants`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("buffer {slot} is tracked twice: {first:?} and {second:?}")]
    TrackedTwice {
        slot: usize,
        first: SlotLocation,
        second: SlotLocation,
    },
    #[error("buffer {slot} is not tracked anywhere")]
    Untracked { slot: usize },
    #[error("buffer {slot} does not exist")]
    UnknownSlot { slot: usize },
    #[error("block {id} is cached by buffers {first} and {second}")]
    DuplicateIdentity {
        id: BlockId,
        first: usize,
        second: usize,
    },
    #[error("block {id} is cached in shard {shard} but belongs elsewhere")]
    Misplaced { id: BlockId, shard: usize },
    #[error("buffer {slot} is on an in-use list without references")]
    Unreferenced { slot: usize },
    #[error("shard {shard} advertises {hinted:?} but holds {actual:?}")]
    StaleLoad {
        shard: usize,
        hinted: ShardLoad,
        actual: ShardLoad,
    },
}

impl<D: BlockDevice, C: ExecContext> BlockCache<D, C> {
    /// Cross-check every shard and the reserve.
    ///
    /// Shards are inspected one lock at a time, so the result is only
    /// meaningful while no other context uses the cache.
    ///
    /// # Errors
    /// The first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen: Vec<Option<SlotLocation>> = vec![None; self.slots.len()];
        let mut identities: BTreeMap<BlockId, SlotIndex> = BTreeMap::new();
        let shards = self.shards.len();

        for (index, shard) in self.shards.iter().enumerate() {
            let state = shard.state.lock();

            for resident in &state.in_use {
                track(&mut seen, resident.slot, SlotLocation::InUse { shard: index })?;
                if resident.refcnt == 0 {
                    return Err(InvariantViolation::Unreferenced {
                        slot: resident.slot,
                    });
                }
                bound(&mut identities, resident.id, resident.slot, index, shards)?;
            }

            for idle in &state.free {
                track(&mut seen, idle.slot, SlotLocation::Free { shard: index })?;
                if let Some(id) = idle.id {
                    bound(&mut identities, id, idle.slot, index, shards)?;
                }
            }

            let hinted = ShardLoad {
                owned: shard.owned_hint(),
                idle: shard.idle_hint(),
            };
            let actual = ShardLoad {
                owned: state.owned(),
                idle: state.free.len(),
            };
            if hinted != actual {
                return Err(InvariantViolation::StaleLoad {
                    shard: index,
                    hinted,
                    actual,
                });
            }
        }

        for &slot in self.reserve.lock().iter() {
            track(&mut seen, slot, SlotLocation::Reserve)?;
        }

        match seen.iter().position(Option::is_none) {
            Some(slot) => Err(InvariantViolation::Untracked { slot }),
            None => Ok(()),
        }
    }
}

fn track(
    seen: &mut [Option<SlotLocation>],
    slot: SlotIndex,
    location: SlotLocation,
) -> Result<(), InvariantViolation> {
    let entry = seen
        .get_mut(slot)
        .ok_or(InvariantViolation::UnknownSlot { slot })?;
    if let Some(first) = *entry {
        return Err(InvariantViolation::TrackedTwice {
            slot,
            first,
            second: location,
        });
    }
    *entry = Some(location);
    Ok(())
}

fn bound(
    identities: &mut BTreeMap<BlockId, SlotIndex>,
    id: BlockId,
    slot: SlotIndex,
    shard: usize,
    shards: usize,
) -> Result<(), InvariantViolation> {
    if id.shard(shards) != shard {
        return Err(InvariantViolation::Misplaced { id, shard });
    }
    if let Some(first) = identities.insert(id, slot) {
        return Err(InvariantViolation::DuplicateIdentity {
            id,
            first,
            second: slot,
        });
    }
    Ok(())
}
