//! # Pool Parameters

/// Size of one disk block in bytes; the payload size of every cache buffer.
pub const BLOCK_SIZE: usize = 1024;

/// Number of buffers in the block cache.
pub const NBUF: usize = 30;

/// Number of block cache shards (hash buckets keyed by block number).
///
/// A prime keeps sequential block numbers evenly spread.
pub const NBUCKET: usize = 13;

/// Minimum number of buffers a shard keeps before peers may steal from it
/// without being under pressure.
pub const SHARD_FLOOR: usize = 2;

/// Maximum number of buffers a shard owns before it spills idle buffers back
/// to the global reserve.
pub const SHARD_CEILING: usize = 4;

/// Maximum number of CPUs (execution units) with a private page free list.
pub const NCPU: usize = 8;

/// Size of one physical page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Byte written over a page handed out by the allocator.
pub const ALLOC_JUNK: u8 = 0x05;

/// Byte written over a page returned to the allocator.
pub const FREE_JUNK: u8 = 0x01;

/// Number of virtual memory area descriptors in the VMA cache.
pub const NVMA: usize = 16;

const _: () = {
    assert!(BLOCK_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(NBUCKET > 0 && NCPU > 0);
    assert!(SHARD_FLOOR <= SHARD_CEILING);
    assert!(SHARD_FLOOR * NBUCKET <= NBUF);
    assert!(ALLOC_JUNK != FREE_JUNK);
    assert!(ALLOC_JUNK != 0 && FREE_JUNK != 0);
};
