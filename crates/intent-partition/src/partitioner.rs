//! Work partitioner
//!
//! Decides which intent keys this replica may drive. A partition is owned
//! once its join has completed and leadership events say this replica leads
//! it. Work on a key is bracketed by a [`WorkGuard`]; leaving a partition
//! stops admitting new guards and waits for the outstanding ones to drop
//! before the leave is acknowledged.

use crate::error::PartitionError;
use crate::leadership::{LeadershipService, PartitionAdmin};
use crate::partition::{partition_for, PartitionId};
use intent_model::{IntentKey, NodeId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Ownership of a partition was gained or lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipChange {
    /// Affected partition
    pub partition: PartitionId,
    /// Whether this replica now owns it
    pub owned: bool,
}

#[derive(Debug, Default)]
struct Membership {
    joined: HashSet<PartitionId>,
    leaving: HashSet<PartitionId>,
    owned: HashSet<PartitionId>,
    in_flight: HashMap<PartitionId, usize>,
}

struct Shared {
    node: NodeId,
    partitions: u32,
    leadership: Arc<dyn LeadershipService>,
    admin: Arc<dyn PartitionAdmin>,
    membership: Mutex<Membership>,
    drained: Notify,
    changes: broadcast::Sender<OwnershipChange>,
}

impl Shared {
    /// Record what this replica believes about `partition`'s leader
    fn observe(&self, partition: PartitionId, leader: Option<&NodeId>) {
        let change = {
            let mut m = self.membership.lock();
            let eligible = m.joined.contains(&partition) && !m.leaving.contains(&partition);
            let leads = eligible && leader == Some(&self.node);
            if leads && m.owned.insert(partition) {
                Some(true)
            } else if !leads && m.owned.remove(&partition) {
                Some(false)
            } else {
                None
            }
        };
        if let Some(owned) = change {
            tracing::info!(node = %self.node, %partition, owned, "ownership changed");
            let _ = self.changes.send(OwnershipChange { partition, owned });
        }
    }

    fn resync(&self) {
        let joined: Vec<PartitionId> = self.membership.lock().joined.iter().copied().collect();
        for partition in joined {
            let leader = self.leadership.leader(partition);
            self.observe(partition, leader.as_ref());
        }
    }

    fn release(&self, partition: PartitionId) {
        let idle = {
            let mut m = self.membership.lock();
            match m.in_flight.get_mut(&partition) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    m.in_flight.remove(&partition);
                    true
                }
                None => true,
            }
        };
        if idle {
            self.drained.notify_waiters();
        }
    }

    fn in_flight(&self, partition: PartitionId) -> usize {
        self.membership.lock().in_flight.get(&partition).copied().unwrap_or(0)
    }
}

/// RAII token for one in-flight processing pass
///
/// Dropping it lets a pending leave of the partition proceed.
pub struct WorkGuard {
    shared: Arc<Shared>,
    partition: PartitionId,
    key: IntentKey,
}

impl WorkGuard {
    /// Partition the key belongs to
    #[inline]
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Key being processed
    #[inline]
    #[must_use]
    pub fn key(&self) -> &IntentKey {
        &self.key
    }

    /// Whether this replica still owns the key's partition
    ///
    /// Checked before every side effect; once false the pass must stop
    /// without writing.
    #[must_use]
    pub fn still_owns(&self) -> bool {
        self.shared.membership.lock().owned.contains(&self.partition)
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.shared.release(self.partition);
    }
}

impl std::fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGuard")
            .field("partition", &self.partition)
            .field("key", &self.key)
            .finish()
    }
}

/// Per-replica view of work ownership
#[derive(Clone)]
pub struct WorkPartitioner {
    shared: Arc<Shared>,
}

impl WorkPartitioner {
    /// Create partitioner for `node`
    #[must_use]
    pub fn new(
        node: NodeId,
        partitions: u32,
        leadership: Arc<dyn LeadershipService>,
        admin: Arc<dyn PartitionAdmin>,
    ) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                node,
                partitions: partitions.max(1),
                leadership,
                admin,
                membership: Mutex::new(Membership::default()),
                drained: Notify::new(),
                changes,
            }),
        }
    }

    /// Follow leadership events until the service shuts down
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn_tracker(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut events = shared.leadership.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.observed_by(&shared.node) {
                            shared.observe(event.partition, event.leader.as_ref());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(node = %shared.node, missed, "leadership events lagged, resyncing");
                        shared.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// This replica
    #[inline]
    #[must_use]
    pub fn node(&self) -> &NodeId {
        &self.shared.node
    }

    /// Size of the key space
    #[inline]
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.shared.partitions
    }

    /// Partition a key maps to
    #[inline]
    #[must_use]
    pub fn partition_of(&self, key: &IntentKey) -> PartitionId {
        partition_for(key, self.shared.partitions)
    }

    /// Whether this replica currently owns `key`
    #[must_use]
    pub fn owns(&self, key: &IntentKey) -> bool {
        self.shared.membership.lock().owned.contains(&self.partition_of(key))
    }

    /// Owned partitions, sorted
    #[must_use]
    pub fn owned_partitions(&self) -> Vec<PartitionId> {
        let mut owned: Vec<_> = self.shared.membership.lock().owned.iter().copied().collect();
        owned.sort();
        owned
    }

    /// Ownership changes of this replica
    #[must_use]
    pub fn on_ownership_changed(&self) -> broadcast::Receiver<OwnershipChange> {
        self.shared.changes.subscribe()
    }

    /// Start a processing pass on `key`
    ///
    /// Returns `None` unless the key's partition is owned and not leaving.
    #[must_use]
    pub fn begin(&self, key: &IntentKey) -> Option<WorkGuard> {
        let partition = self.partition_of(key);
        {
            let mut m = self.shared.membership.lock();
            if !m.owned.contains(&partition) || m.leaving.contains(&partition) {
                return None;
            }
            *m.in_flight.entry(partition).or_default() += 1;
        }
        Some(WorkGuard {
            shared: Arc::clone(&self.shared),
            partition,
            key: key.clone(),
        })
    }

    /// Join a partition and stand for its leadership
    ///
    /// No key of the partition is processed before the membership change is
    /// durable.
    ///
    /// # Errors
    /// Returns error if the partition is out of range or the admin fails
    pub async fn join(&self, partition: PartitionId) -> Result<(), PartitionError> {
        self.check_range(partition)?;
        let shared = &self.shared;
        shared.admin.join(partition, &shared.node).await?;

        shared.membership.lock().joined.insert(partition);
        shared.leadership.run_for(partition, &shared.node);
        let leader = shared.leadership.leader(partition);
        shared.observe(partition, leader.as_ref());
        tracing::debug!(node = %shared.node, %partition, "joined partition");
        Ok(())
    }

    /// Join every partition of the key space
    ///
    /// # Errors
    /// Returns the first join error
    pub async fn join_all(&self) -> Result<(), PartitionError> {
        for p in 0..self.shared.partitions {
            self.join(PartitionId(p)).await?;
        }
        Ok(())
    }

    /// Leave a partition after draining in-flight work
    ///
    /// # Errors
    /// Returns error if the partition is out of range, already leaving, or
    /// the admin fails
    pub async fn leave(&self, partition: PartitionId) -> Result<(), PartitionError> {
        self.check_range(partition)?;
        let shared = &self.shared;
        let lost = {
            let mut m = shared.membership.lock();
            if !m.joined.contains(&partition) {
                return Err(PartitionError::NotMember(partition));
            }
            if !m.leaving.insert(partition) {
                return Err(PartitionError::AlreadyLeaving(partition));
            }
            m.owned.remove(&partition)
        };
        if lost {
            let _ = shared.changes.send(OwnershipChange {
                partition,
                owned: false,
            });
        }

        self.drain(partition).await;
        shared.leadership.withdraw(partition, &shared.node);
        let result = shared.admin.leave(partition, &shared.node).await;

        let mut m = shared.membership.lock();
        m.leaving.remove(&partition);
        if result.is_ok() {
            m.joined.remove(&partition);
        }
        drop(m);
        tracing::debug!(node = %shared.node, %partition, ok = result.is_ok(), "left partition");
        result
    }

    /// Leave every joined partition
    ///
    /// # Errors
    /// Returns the first leave error
    pub async fn leave_all(&self) -> Result<(), PartitionError> {
        let mut joined: Vec<_> = self.shared.membership.lock().joined.iter().copied().collect();
        joined.sort();
        for partition in joined {
            self.leave(partition).await?;
        }
        Ok(())
    }

    /// Passes currently in flight on a partition
    #[inline]
    #[must_use]
    pub fn in_flight(&self, partition: PartitionId) -> usize {
        self.shared.in_flight(partition)
    }

    async fn drain(&self, partition: PartitionId) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.in_flight(partition) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn check_range(&self, partition: PartitionId) -> Result<(), PartitionError> {
        if partition.0 < self.shared.partitions {
            Ok(())
        } else {
            Err(PartitionError::OutOfRange {
                partition,
                partitions: self.shared.partitions,
            })
        }
    }
}

impl std::fmt::Debug for WorkPartitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkPartitioner")
            .field("node", &self.shared.node)
            .field("partitions", &self.shared.partitions)
            .field("owned", &self.owned_partitions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leadership::{LocalLeadershipService, LocalPartitionAdmin};
    use std::time::Duration;

    fn partitioner(node: &str, leadership: &Arc<LocalLeadershipService>) -> WorkPartitioner {
        WorkPartitioner::new(
            NodeId::new(node),
            4,
            Arc::clone(leadership) as Arc<dyn LeadershipService>,
            Arc::new(LocalPartitionAdmin::new()),
        )
    }

    fn key_in(p: &WorkPartitioner, partition: PartitionId) -> IntentKey {
        (0..)
            .map(|i| IntentKey::new(format!("key-{i}")))
            .find(|k| p.partition_of(k) == partition)
            .unwrap()
    }

    #[tokio::test]
    async fn nothing_owned_before_join() {
        let leadership = Arc::new(LocalLeadershipService::new());
        let p = partitioner("a", &leadership);
        let key = key_in(&p, PartitionId(0));
        assert!(!p.owns(&key));
        assert!(p.begin(&key).is_none());

        p.join(PartitionId(0)).await.unwrap();
        assert!(p.owns(&key));
        assert!(p.begin(&key).is_some());
    }

    #[tokio::test]
    async fn second_replica_takes_over_after_leave() {
        let leadership = Arc::new(LocalLeadershipService::new());
        let a = partitioner("a", &leadership);
        let b = partitioner("b", &leadership);
        let _ta = a.spawn_tracker();
        let _tb = b.spawn_tracker();
        let mut b_changes = b.on_ownership_changed();

        a.join(PartitionId(1)).await.unwrap();
        b.join(PartitionId(1)).await.unwrap();
        assert_eq!(a.owned_partitions(), vec![PartitionId(1)]);
        assert!(b.owned_partitions().is_empty());

        a.leave(PartitionId(1)).await.unwrap();
        let change = tokio::time::timeout(Duration::from_secs(1), b_changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change, OwnershipChange { partition: PartitionId(1), owned: true });
        assert!(a.owned_partitions().is_empty());
    }

    #[tokio::test]
    async fn leave_waits_for_in_flight_work() {
        let leadership = Arc::new(LocalLeadershipService::new());
        let p = partitioner("a", &leadership);
        p.join(PartitionId(2)).await.unwrap();
        let key = key_in(&p, PartitionId(2));
        let guard = p.begin(&key).unwrap();

        let leaving = tokio::spawn({
            let p = p.clone();
            async move { p.leave(PartitionId(2)).await }
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!leaving.is_finished());
        assert!(!guard.still_owns());
        assert!(p.begin(&key).is_none());

        drop(guard);
        leaving.await.unwrap().unwrap();
        assert_eq!(p.in_flight(PartitionId(2)), 0);
    }

    #[tokio::test]
    async fn forced_leader_creates_dual_ownership() {
        let leadership = Arc::new(LocalLeadershipService::new());
        let a = partitioner("a", &leadership);
        let b = partitioner("b", &leadership);
        let _ta = a.spawn_tracker();
        let _tb = b.spawn_tracker();
        let mut b_changes = b.on_ownership_changed();

        a.join(PartitionId(3)).await.unwrap();
        b.join(PartitionId(3)).await.unwrap();
        leadership.force_leader(PartitionId(3), b.node());
        b_changes.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // `a` is outside the event's audience and keeps its stale view
        let key = key_in(&a, PartitionId(3));
        assert!(a.owns(&key));
        assert!(b.owns(&key));
    }

    #[tokio::test]
    async fn out_of_range_partition_is_rejected() {
        let leadership = Arc::new(LocalLeadershipService::new());
        let p = partitioner("a", &leadership);
        assert!(matches!(
            p.join(PartitionId(9)).await,
            Err(PartitionError::OutOfRange { .. })
        ));
        assert_eq!(p.leave(PartitionId(0)).await, Err(PartitionError::NotMember(PartitionId(0))));
    }
}
