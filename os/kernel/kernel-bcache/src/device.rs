use crate::{Block, BlockId, BlockNo, DeviceError, DeviceId};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_info::params::BLOCK_SIZE;
use kernel_sync::SpinLock;

/// The disk driver underneath the cache.
///
/// Both calls are synchronous and may take a long time; the cache only issues
/// them while holding the buffer's sleep lock and no spin lock.
pub trait BlockDevice: Sync {
    /// Fill `buf` with the current contents of block `id`.
    ///
    /// # Errors
    /// Whatever the device reports; the buffer contents are unspecified then.
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DeviceError>;

    /// Persist `buf` as the new contents of block `id`.
    ///
    /// # Errors
    /// Whatever the device reports.
    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    #[inline]
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DeviceError> {
        (**self).read_block(id, buf)
    }

    #[inline]
    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DeviceError> {
        (**self).write_block(id, buf)
    }
}

/// Memory-backed block device answering for a single [`DeviceId`].
///
/// Blocks start zeroed. The device counts transfers so callers can tell cache
/// hits from device traffic.
pub struct RamDisk {
    device: DeviceId,
    blocks: SpinLock<Vec<Block>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    #[must_use]
    pub fn new(device: DeviceId, blocks: BlockNo) -> Self {
        Self {
            device,
            blocks: SpinLock::named("ramdisk", alloc::vec![[0; BLOCK_SIZE]; blocks as usize]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn device(&self) -> DeviceId {
        self.device
    }

    #[must_use]
    pub fn capacity(&self) -> BlockNo {
        BlockNo::try_from(self.blocks.lock().len()).unwrap_or(BlockNo::MAX)
    }

    /// Number of completed block reads.
    #[inline]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed block writes.
    #[inline]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of a block as stored on the device, bypassing any cache.
    #[must_use]
    pub fn snapshot(&self, block: BlockNo) -> Option<Block> {
        self.blocks.lock().get(block as usize).copied()
    }

    fn check(&self, id: BlockId) -> Result<usize, DeviceError> {
        if id.device != self.device {
            return Err(DeviceError::NoSuchDevice(id.device));
        }
        Ok(id.block as usize)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, id: BlockId, buf: &mut Block) -> Result<(), DeviceError> {
        let index = self.check(id)?;
        let blocks = self.blocks.lock();
        let stored = blocks.get(index).ok_or(DeviceError::OutOfRange {
            device: id.device,
            block: id.block,
        })?;
        buf.copy_from_slice(stored);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, id: BlockId, buf: &Block) -> Result<(), DeviceError> {
        let index = self.check(id)?;
        let mut blocks = self.blocks.lock();
        let stored = blocks.get_mut(index).ok_or(DeviceError::OutOfRange {
            device: id.device,
            block: id.block,
        })?;
        stored.copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
