use kernel_bcache::{
    Block, BlockCache, BlockCacheConfig, BlockDevice, BlockId, DeviceError, RamDisk,
};
use kernel_sync::ThreadContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

const BLOCKS: u32 = 48;
const THREADS: u64 = 8;

/// Two RAM disks behind one driver.
struct Disks([RamDisk; 2]);

impl Disks {
    fn new() -> Self {
        Self([RamDisk::new(1, BLOCKS), RamDisk::new(2, BLOCKS)])
    }

    fn disk(&self, id: BlockId) -> Result<&RamDisk, DeviceError> {
        self.0
            .iter()
            .find(|d| d.device() == id.device)
            .ok_or(DeviceError::NoSuchDevice(id.device))
    }
}

impl BlockDevice for Disks {
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DeviceError> {
        self.disk(id)?.read_block(id, buf)
    }

    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DeviceError> {
        self.disk(id)?.write_block(id, buf)
    }
}

type Cache = BlockCache<Disks, ThreadContext>;

/// Per-block bookkeeping kept outside the cache.
struct Ledger {
    busy: Vec<AtomicBool>,
    increments: Vec<AtomicU64>,
}

impl Ledger {
    fn new() -> Self {
        let n = 2 * BLOCKS as usize;
        Self {
            busy: (0..n).map(|_| AtomicBool::new(false)).collect(),
            increments: (0..n).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn index(device: u32, block: u32) -> usize {
        (device as usize - 1) * BLOCKS as usize + block as usize
    }

    fn enter(&self, device: u32, block: u32) {
        let was_busy = self.busy[Self::index(device, block)].swap(true, Ordering::SeqCst);
        assert!(!was_busy, "two holders of {device}:{block}");
    }

    fn leave(&self, device: u32, block: u32) {
        self.busy[Self::index(device, block)].store(false, Ordering::SeqCst);
    }
}

fn counter(buf: &Block) -> u64 {
    u64::from_le_bytes(buf[..8].try_into().unwrap())
}

fn bump(cache: &Cache, ledger: &Ledger, device: u32, block: u32) {
    let mut buf = cache.read(device, block).unwrap();
    ledger.enter(device, block);
    let next = counter(&buf) + 1;
    buf[..8].copy_from_slice(&next.to_le_bytes());
    buf.write_back().unwrap();
    ledger.increments[Ledger::index(device, block)].fetch_add(1, Ordering::Relaxed);
    ledger.leave(device, block);
}

fn verify(cache: &Cache, ledger: &Ledger) {
    cache.check_invariants().unwrap();
    for device in 1..=2 {
        for block in 0..BLOCKS {
            let expected = ledger.increments[Ledger::index(device, block)].load(Ordering::Relaxed);
            let buf = cache.read(device, block).unwrap();
            assert_eq!(counter(&buf), expected, "block {device}:{block}");
        }
    }
    cache.check_invariants().unwrap();
}

#[test]
fn random_traffic_keeps_blocks_exclusive_and_consistent() {
    const ROUNDS: usize = 2_000;
    let cache: Cache = BlockCache::new(Disks::new(), BlockCacheConfig::default()).unwrap();
    let ledger = Ledger::new();

    thread::scope(|s| {
        for seed in 0..THREADS {
            let (cache, ledger) = (&cache, &ledger);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..ROUNDS {
                    let device = rng.random_range(1..=2);
                    let block = rng.random_range(0..BLOCKS);
                    bump(cache, ledger, device, block);
                }
            });
        }
    });

    let stats = cache.stats();
    assert_eq!(stats.lookups(), THREADS as usize * ROUNDS);
    assert_eq!(stats.device_writes, THREADS as usize * ROUNDS);
    assert!(stats.hits > 0);
    verify(&cache, &ledger);
}

#[test]
fn one_hot_block_serializes_every_writer() {
    const ROUNDS: usize = 500;
    let cache: Cache = BlockCache::new(Disks::new(), BlockCacheConfig::default()).unwrap();
    let ledger = Ledger::new();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    bump(&cache, &ledger, 1, 17);
                }
            });
        }
    });

    let buf = cache.read(1, 17).unwrap();
    assert_eq!(counter(&buf), THREADS * ROUNDS as u64);
    drop(buf);
    assert_eq!(cache.device().0[0].reads(), 1);
    verify(&cache, &ledger);
}

#[test]
fn small_pool_steals_without_deadlock() {
    const ROUNDS: usize = 1_000;
    const WORKERS: u64 = 6;
    let config = BlockCacheConfig {
        buffers: 16,
        shards: 5,
        shard_floor: 2,
        shard_ceiling: 4,
    };
    let cache: Cache = BlockCache::new(Disks::new(), config).unwrap();
    let ledger = Ledger::new();

    thread::scope(|s| {
        for seed in 0..WORKERS {
            let (cache, ledger) = (&cache, &ledger);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xB10C + seed);
                for _ in 0..ROUNDS {
                    // Two buffers at once, always in block order.
                    let first = rng.random_range(0..BLOCKS - 1);
                    let second = rng.random_range(first + 1..BLOCKS);
                    let mut a = cache.read(1, first).unwrap();
                    let mut b = cache.read(1, second).unwrap();
                    ledger.enter(1, first);
                    ledger.enter(1, second);
                    for (buf, block) in [(&mut a, first), (&mut b, second)] {
                        let next = counter(buf) + 1;
                        buf[..8].copy_from_slice(&next.to_le_bytes());
                        buf.write_back().unwrap();
                        ledger.increments[Ledger::index(1, block)].fetch_add(1, Ordering::Relaxed);
                    }
                    ledger.leave(1, second);
                    ledger.leave(1, first);
                }
            });
        }
    });

    assert!(cache.stats().steals > 0);
    verify(&cache, &ledger);
}
