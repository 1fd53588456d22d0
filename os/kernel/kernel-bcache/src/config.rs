use crate::ConfigError;
use kernel_info::params::{NBUCKET, NBUF, SHARD_CEILING, SHARD_FLOOR};

/// Shape of a [`BlockCache`](crate::BlockCache).
///
/// The defaults come from [`kernel_info::params`]: 30 buffers over 13 shards,
/// each shard keeping at least 2 and at most 4 buffers, which leaves 4 buffers
/// in the global reserve.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockCacheConfig {
    /// Total number of buffers (`N`).
    pub buffers: usize,
    /// Number of shards.
    pub shards: usize,
    /// Buffers handed to every shard at initialization. Peers only steal below
    /// this count when no shard above it has an idle buffer.
    pub shard_floor: usize,
    /// Most buffers a shard keeps; above it, released buffers spill back to
    /// the reserve and misses stop drawing from it.
    pub shard_ceiling: usize,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            buffers: NBUF,
            shards: NBUCKET,
            shard_floor: SHARD_FLOOR,
            shard_ceiling: SHARD_CEILING,
        }
    }
}

impl BlockCacheConfig {
    /// Buffers that start out in the global reserve.
    #[inline]
    #[must_use]
    pub const fn reserve(&self) -> usize {
        self.buffers - self.shards * self.shard_floor
    }

    /// Check the shape for internal consistency.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.buffers == 0 {
            return Err(ConfigError::NoBuffers);
        }
        if self.shards == 0 {
            return Err(ConfigError::NoShards);
        }
        if self.shard_ceiling == 0 {
            return Err(ConfigError::ZeroCeiling);
        }
        if self.shard_floor > self.shard_ceiling {
            return Err(ConfigError::FloorAboveCeiling {
                floor: self.shard_floor,
                ceiling: self.shard_ceiling,
            });
        }
        let needed = self.shards * self.shard_floor;
        if needed > self.buffers {
            return Err(ConfigError::FloorExceedsCapacity {
                needed,
                buffers: self.buffers,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape_is_valid() {
        let config = BlockCacheConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.reserve(), NBUF - NBUCKET * SHARD_FLOOR);
    }

    #[test]
    fn rejects_floor_above_ceiling() {
        let config = BlockCacheConfig {
            buffers: 10,
            shards: 2,
            shard_floor: 3,
            shard_ceiling: 2,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FloorAboveCeiling {
                floor: 3,
                ceiling: 2
            })
        );
    }

    #[test]
    fn rejects_floors_that_do_not_fit() {
        let config = BlockCacheConfig {
            buffers: 5,
            shards: 3,
            shard_floor: 2,
            shard_ceiling: 4,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FloorExceedsCapacity {
                needed: 6,
                buffers: 5
            })
        );
    }

    #[test]
    fn rejects_empty_shapes() {
        let mut config = BlockCacheConfig::default();
        config.shards = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoShards));

        let mut config = BlockCacheConfig::default();
        config.buffers = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoBuffers));
    }
}
