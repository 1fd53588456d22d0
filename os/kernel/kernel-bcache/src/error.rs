use crate::{BlockNo, DeviceId};

/// Failure reported by a [`BlockDevice`](crate::BlockDevice).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} does not exist")]
    NoSuchDevice(DeviceId),
    #[error("block {block} is beyond the end of device {device}")]
    OutOfRange { device: DeviceId, block: BlockNo },
    #[error("reading block {block} from device {device} failed")]
    Read { device: DeviceId, block: BlockNo },
    #[error("writing block {block} to device {device} failed")]
    Write { device: DeviceId, block: BlockNo },
}

/// Recoverable failure of a cache operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockCacheError {
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Inconsistent [`BlockCacheConfig`](crate::BlockCacheConfig).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("the cache needs at least one buffer")]
    NoBuffers,
    #[error("the cache needs at least one shard")]
    NoShards,
    #[error("a shard ceiling of zero leaves no shard able to cache a block")]
    ZeroCeiling,
    #[error("shard floor {floor} is above shard ceiling {ceiling}")]
    FloorAboveCeiling { floor: usize, ceiling: usize },
    #[error("shard floors need {needed} buffers but the pool has {buffers}")]
    FloorExceedsCapacity { needed: usize, buffers: usize },
}
