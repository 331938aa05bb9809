//! Work Partitioner
//!
//! Ensures at most one replica drives a given intent key at a time, while
//! some replica always eventually does.
//!
//! # Core Concepts
//!
//! - [`partition_for`]: stable mapping of keys onto a fixed number of partitions
//! - [`LeadershipService`]: per-partition election (external collaborator)
//! - [`PartitionAdmin`]: asynchronous partition join/leave (external collaborator)
//! - [`WorkPartitioner`]: `owns(key)`, ownership change stream, and
//!   [`WorkGuard`]s that a leave drains before it is acknowledged
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_partition::{LocalLeadershipService, LocalPartitionAdmin, WorkPartitioner};
//!
//! let partitioner = WorkPartitioner::new(node, 16, leadership, admin);
//! let _tracker = partitioner.spawn_tracker();
//! partitioner.join_all().await?;
//! if let Some(guard) = partitioner.begin(&key) {
//!     // process, checking guard.still_owns() before each side effect
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod leadership;
mod partition;
mod partitioner;

pub use error::PartitionError;
pub use leadership::{
    LeadershipEvent, LeadershipService, LocalLeadershipService, LocalPartitionAdmin, PartitionAdmin,
};
pub use partition::{partition_for, PartitionId, DEFAULT_PARTITIONS};
pub use partitioner::{OwnershipChange, WorkGuard, WorkPartitioner};
