//! Partition error types

use crate::partition::PartitionId;

/// Errors raised by membership changes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    /// Partition id outside the key space
    #[error("partition {partition} out of range (key space has {partitions})")]
    OutOfRange { partition: PartitionId, partitions: u32 },

    /// Membership service refused or failed the change
    #[error("membership change for {partition} failed: {reason}")]
    Membership { partition: PartitionId, reason: String },

    /// A leave for this partition is already draining
    #[error("partition {0} is already leaving")]
    AlreadyLeaving(PartitionId),

    /// Replica is not a member of the partition
    #[error("not a member of partition {0}")]
    NotMember(PartitionId),
}
