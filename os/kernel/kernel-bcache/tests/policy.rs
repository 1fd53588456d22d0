use kernel_bcache::{
    Block, BlockCache, BlockCacheConfig, BlockCacheError, BlockDevice, BlockId, DeviceError,
    RamDisk, ShardLoad,
};
use kernel_sync::ThreadContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

type Cache = BlockCache<RamDisk, ThreadContext>;

const DEV: u32 = 1;

fn cache(buffers: usize, shards: usize, shard_floor: usize, shard_ceiling: usize) -> Cache {
    let config = BlockCacheConfig {
        buffers,
        shards,
        shard_floor,
        shard_ceiling,
    };
    BlockCache::new(RamDisk::new(DEV, 64), config).unwrap()
}

#[test]
fn default_pool_starts_at_the_floors() {
    let cache: Cache = BlockCache::new(RamDisk::new(DEV, 64), BlockCacheConfig::default()).unwrap();
    let config = *cache.config();
    assert!(cache.shard_loads().iter().all(|load| *load
        == ShardLoad {
            owned: config.shard_floor,
            idle: config.shard_floor
        }));
    assert_eq!(cache.reserve_len(), config.reserve());
    cache.check_invariants().unwrap();
}

#[test]
fn released_block_is_a_hit_without_device_io() {
    let cache = cache(4, 2, 1, 2);

    let mut buf = cache.read(DEV, 5).unwrap();
    let slot = buf.slot();
    buf[0] = 42;
    buf.write_back().unwrap();
    buf.release();
    assert_eq!(cache.refcount(DEV, 5), Some(0));

    let buf = cache.read(DEV, 5).unwrap();
    assert_eq!(buf.slot(), slot);
    assert_eq!(buf[0], 42);
    drop(buf);

    assert_eq!(cache.device().reads(), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.device_reads, 1);
    assert_eq!(stats.device_writes, 1);
}

#[test]
fn ensure_loaded_reads_only_once() {
    let cache = cache(2, 1, 1, 2);
    let mut buf = cache.get(DEV, 3);
    assert!(!buf.is_valid());
    buf.ensure_loaded().unwrap();
    buf.ensure_loaded().unwrap();
    assert!(buf.is_valid());
    drop(buf);
    assert_eq!(cache.device().reads(), 1);
}

#[test]
fn write_back_without_a_read_makes_the_payload_current() {
    let cache = cache(2, 1, 1, 2);
    let mut buf = cache.get(DEV, 9);
    buf.fill(0x5A);
    buf.write_back().unwrap();
    drop(buf);

    let buf = cache.read(DEV, 9).unwrap();
    assert!(buf.iter().all(|&b| b == 0x5A));
    drop(buf);
    assert_eq!(cache.device().reads(), 0);
    assert_eq!(cache.device().snapshot(9).unwrap()[0], 0x5A);
}

/// A disk whose transfers fail while `failing` is set.
struct FlakyDisk {
    disk: RamDisk,
    failing: AtomicBool,
}

impl BlockDevice for FlakyDisk {
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DeviceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Read {
                device: id.device,
                block: id.block,
            });
        }
        self.disk.read_block(id, buf)
    }

    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DeviceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Write {
                device: id.device,
                block: id.block,
            });
        }
        self.disk.write_block(id, buf)
    }
}

#[test]
fn failed_transfers_leave_the_buffer_invalid_until_a_retry_succeeds() {
    let disk = FlakyDisk {
        disk: RamDisk::new(DEV, 8),
        failing: AtomicBool::new(true),
    };
    let config = BlockCacheConfig {
        buffers: 2,
        shards: 1,
        shard_floor: 1,
        shard_ceiling: 2,
    };
    let cache: BlockCache<FlakyDisk, ThreadContext> = BlockCache::new(disk, config).unwrap();

    let mut buf = cache.get(DEV, 3);
    assert_eq!(
        buf.ensure_loaded(),
        Err(BlockCacheError::Device(DeviceError::Read {
            device: DEV,
            block: 3
        }))
    );
    assert!(!buf.is_valid());

    buf[0] = 0x7E;
    assert_eq!(
        buf.write_back(),
        Err(BlockCacheError::Device(DeviceError::Write {
            device: DEV,
            block: 3
        }))
    );
    assert!(!buf.is_valid());
    drop(buf);
    assert_eq!(cache.refcount(DEV, 3), Some(0));

    cache.device().failing.store(false, Ordering::SeqCst);
    let buf = cache.read(DEV, 3).unwrap();
    assert!(buf.is_valid());
    // The failed write never reached the disk; the retried read replaced the
    // unwritten payload.
    assert_eq!(buf[0], 0);
    assert_eq!(cache.device().disk.reads(), 1);
    assert_eq!(cache.device().disk.writes(), 0);
    drop(buf);
    cache.check_invariants().unwrap();
}

#[test]
fn evicted_block_is_reloaded_from_the_device() {
    let cache = cache(1, 1, 1, 1);

    let mut buf = cache.read(DEV, 1).unwrap();
    buf[7] = 7;
    buf.write_back().unwrap();
    drop(buf);

    // The only buffer is rebound to block 2, forgetting block 1.
    drop(cache.read(DEV, 2).unwrap());
    assert!(!cache.contains(DEV, 1));

    let buf = cache.read(DEV, 1).unwrap();
    assert_eq!(buf[7], 7);
    drop(buf);
    assert_eq!(cache.device().reads(), 3);
}

#[test]
fn device_errors_are_reported_and_the_buffer_released() {
    let cache = cache(2, 1, 1, 2);

    let err = cache.read(DEV, 1000).unwrap_err();
    assert_eq!(
        err,
        BlockCacheError::Device(DeviceError::OutOfRange {
            device: DEV,
            block: 1000
        })
    );
    assert_eq!(cache.refcount(DEV, 1000), Some(0));

    let err = cache.read(9, 0).unwrap_err();
    assert_eq!(err, BlockCacheError::Device(DeviceError::NoSuchDevice(9)));

    // A failed read leaves the payload invalid, so the next read retries.
    let mut buf = cache.get(DEV, 1000);
    assert!(!buf.is_valid());
    assert!(buf.ensure_loaded().is_err());
    drop(buf);

    cache.check_invariants().unwrap();
}

#[test]
fn steal_takes_the_lru_buffer_of_the_shard_above_its_floor() {
    // Four shards with two buffers each, two more in the reserve.
    let cache = cache(10, 4, 2, 4);

    // Blocks 0, 4, 8, 12 all land in shard 0: two from its free list, two
    // from the reserve.
    let held: Vec<_> = [0, 4, 8, 12].map(|b| cache.get(DEV, b)).into();
    assert_eq!(cache.reserve_len(), 0);
    assert_eq!(cache.shard_loads()[0], ShardLoad { owned: 4, idle: 0 });
    drop(held); // block 0 is released first and becomes the LRU buffer

    // Shard 3 uses up its own two buffers.
    let _b3 = cache.get(DEV, 3);
    let _b7 = cache.get(DEV, 7);

    // Shards 1 and 2 sit at their floor; shard 0 has four idle buffers.
    let _b11 = cache.get(DEV, 11);

    assert!(!cache.contains(DEV, 0));
    for block in [4, 8, 12] {
        assert_eq!(cache.refcount(DEV, block), Some(0));
    }
    let loads = cache.shard_loads();
    assert_eq!(loads[0], ShardLoad { owned: 3, idle: 3 });
    assert_eq!(loads[1], ShardLoad { owned: 2, idle: 2 });
    assert_eq!(loads[2], ShardLoad { owned: 2, idle: 2 });
    assert_eq!(loads[3], ShardLoad { owned: 3, idle: 0 });
    assert_eq!(cache.stats().steals, 1);
    cache.check_invariants().unwrap();
}

#[test]
fn the_reserve_is_used_above_the_ceiling_before_robbing_a_floor() {
    let cache = cache(6, 2, 1, 2);

    let held: Vec<_> = [0, 2, 4].map(|b| cache.get(DEV, b)).into();
    assert_eq!(cache.shard_loads()[0].owned, 3);
    assert_eq!(cache.shard_loads()[1], ShardLoad { owned: 1, idle: 1 });
    assert_eq!(cache.reserve_len(), 2);
    drop(held);

    // Releasing block 0 leaves shard 0 above its ceiling; its LRU idle
    // buffer, block 0 itself, goes back to the reserve.
    assert_eq!(cache.shard_loads()[0], ShardLoad { owned: 2, idle: 2 });
    assert_eq!(cache.reserve_len(), 3);
    assert_eq!(cache.stats().spills, 1);
    assert!(!cache.contains(DEV, 0));
    assert!(cache.contains(DEV, 2));
    assert!(cache.contains(DEV, 4));
    cache.check_invariants().unwrap();
}

#[test]
fn floors_are_given_up_when_nothing_else_is_idle() {
    let cache = cache(4, 2, 2, 2);

    let _a = cache.get(DEV, 0);
    let _b = cache.get(DEV, 2);
    let _c = cache.get(DEV, 4);

    assert_eq!(cache.shard_loads()[0], ShardLoad { owned: 3, idle: 0 });
    assert_eq!(cache.shard_loads()[1], ShardLoad { owned: 1, idle: 1 });
    cache.check_invariants().unwrap();
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn running_out_of_idle_buffers_is_fatal() {
    let cache = cache(4, 2, 2, 2);
    let _held: Vec<_> = (0..4).map(|b| cache.get(DEV, b)).collect();
    let _ = cache.get(DEV, 4);
}

#[test]
fn pinned_buffer_stays_resident_until_unpinned() {
    let cache = cache(1, 1, 1, 1);

    let buf = cache.read(DEV, 1).unwrap();
    let pin = buf.pin();
    assert_eq!(cache.refcount(DEV, 1), Some(2));
    drop(buf);
    assert_eq!(cache.refcount(DEV, 1), Some(1));

    // Still resident: a lookup is a hit.
    drop(cache.read(DEV, 1).unwrap());
    assert_eq!(cache.device().reads(), 1);

    assert_eq!(pin.id().block, 1);
    cache.unpin(pin);
    assert_eq!(cache.refcount(DEV, 1), Some(0));

    drop(cache.read(DEV, 2).unwrap());
    assert!(!cache.contains(DEV, 1));
    cache.check_invariants().unwrap();
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn pinned_buffer_is_never_evicted() {
    let cache = cache(1, 1, 1, 1);
    let pin = cache.get(DEV, 1).pin();
    let _ = cache.get(DEV, 2);
    cache.unpin(pin);
}

#[test]
fn concurrent_lookups_of_one_block_share_the_buffer() {
    let cache = cache(4, 2, 1, 2);
    let waiter_done = AtomicBool::new(false);

    let mut held = cache.get(DEV, 5);
    held[0] = 1;
    let slot = held.slot();

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let mut buf = cache.get(DEV, 5);
            buf[0] += 1;
            waiter_done.store(true, Ordering::SeqCst);
            buf.slot()
        });

        // The waiter took its reference and now waits for the payload.
        while cache.refcount(DEV, 5) != Some(2) {
            thread::yield_now();
        }
        assert!(!waiter_done.load(Ordering::SeqCst));
        drop(held);

        assert_eq!(waiter.join().unwrap(), slot);
    });

    let buf = cache.get(DEV, 5);
    assert_eq!(buf[0], 2);
    assert_eq!(buf.slot(), slot);
    drop(buf);
    assert_eq!(cache.refcount(DEV, 5), Some(0));
    cache.check_invariants().unwrap();
}
