//! Key space partitioning

use intent_model::{Digest, IntentKey};
use std::fmt;

/// Default number of partitions
pub const DEFAULT_PARTITIONS: u32 = 16;

/// Shard of the intent key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Partition owning `key`
///
/// Stable across replicas and restarts: depends only on the key bytes and
/// the partition count.
#[must_use]
pub fn partition_for(key: &IntentKey, partitions: u32) -> PartitionId {
    let digest = Digest::compute(key.as_str().as_bytes());
    let bucket = digest.prefix_u64() % u64::from(partitions.max(1));
    // bucket < partitions, which is a u32
    PartitionId(u32::try_from(bucket).unwrap_or(0))
}
