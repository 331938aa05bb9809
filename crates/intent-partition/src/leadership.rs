//! Leadership and membership contracts, with in-process implementations

use crate::error::PartitionError;
use crate::partition::PartitionId;
use intent_model::NodeId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::broadcast;

/// Change of leadership for one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipEvent {
    /// Partition whose leader changed
    pub partition: PartitionId,
    /// New leader; `None` while the partition has none
    pub leader: Option<NodeId>,
    /// Replicas that observed the change; `None` means all of them
    pub audience: Option<Vec<NodeId>>,
}

impl LeadershipEvent {
    /// Whether `node` observed this change
    #[inline]
    #[must_use]
    pub fn observed_by(&self, node: &NodeId) -> bool {
        self.audience.as_ref().map_or(true, |a| a.contains(node))
    }
}

/// Per-partition leader election
pub trait LeadershipService: Send + Sync {
    /// Current leader of a partition
    fn leader(&self, partition: PartitionId) -> Option<NodeId>;

    /// Enter the election for a partition
    fn run_for(&self, partition: PartitionId, node: &NodeId);

    /// Leave the election; hands leadership to the next candidate
    fn withdraw(&self, partition: PartitionId, node: &NodeId);

    /// Leadership changes
    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent>;
}

/// Cluster partition membership
///
/// Both futures complete once the change is durable cluster-wide.
#[async_trait::async_trait]
pub trait PartitionAdmin: Send + Sync {
    /// Join a partition
    async fn join(&self, partition: PartitionId, node: &NodeId) -> Result<(), PartitionError>;

    /// Leave a partition
    async fn leave(&self, partition: PartitionId, node: &NodeId) -> Result<(), PartitionError>;
}

/// In-process election: the earliest live candidate leads
#[derive(Debug)]
pub struct LocalLeadershipService {
    candidates: Mutex<BTreeMap<PartitionId, Vec<NodeId>>>,
    events: broadcast::Sender<LeadershipEvent>,
}

impl Default for LocalLeadershipService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLeadershipService {
    /// Create service with no candidates
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            candidates: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    /// Tell only `node` that it leads `partition`
    ///
    /// The authoritative leader is unchanged and no other replica hears of
    /// it, so afterwards two replicas may both believe they own the partition.
    pub fn force_leader(&self, partition: PartitionId, node: &NodeId) {
        tracing::debug!(%partition, %node, "forcing stale leadership view");
        self.publish(LeadershipEvent {
            partition,
            leader: Some(node.clone()),
            audience: Some(vec![node.clone()]),
        });
    }

    /// Candidates of a partition in election order
    #[must_use]
    pub fn candidates(&self, partition: PartitionId) -> Vec<NodeId> {
        self.candidates.lock().get(&partition).cloned().unwrap_or_default()
    }

    fn publish(&self, event: LeadershipEvent) {
        let _ = self.events.send(event);
    }
}

impl LeadershipService for LocalLeadershipService {
    fn leader(&self, partition: PartitionId) -> Option<NodeId> {
        self.candidates.lock().get(&partition).and_then(|c| c.first().cloned())
    }

    fn run_for(&self, partition: PartitionId, node: &NodeId) {
        let elected = {
            let mut candidates = self.candidates.lock();
            let list = candidates.entry(partition).or_default();
            if list.contains(node) {
                return;
            }
            list.push(node.clone());
            list.len() == 1
        };
        if elected {
            self.publish(LeadershipEvent {
                partition,
                leader: Some(node.clone()),
                audience: None,
            });
        }
    }

    fn withdraw(&self, partition: PartitionId, node: &NodeId) {
        let successor = {
            let mut candidates = self.candidates.lock();
            let Some(list) = candidates.get_mut(&partition) else {
                return;
            };
            let Some(pos) = list.iter().position(|n| n == node) else {
                return;
            };
            list.remove(pos);
            if pos != 0 {
                return;
            }
            list.first().cloned()
        };
        self.publish(LeadershipEvent {
            partition,
            leader: successor,
            audience: None,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.events.subscribe()
    }
}

/// In-process membership table with optional latency
#[derive(Debug, Default)]
pub struct LocalPartitionAdmin {
    members: Mutex<BTreeMap<PartitionId, BTreeSet<NodeId>>>,
    latency: Duration,
}

impl LocalPartitionAdmin {
    /// Create admin that completes changes immediately
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With latency applied to every change
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Members of a partition
    #[must_use]
    pub fn members(&self, partition: PartitionId) -> BTreeSet<NodeId> {
        self.members.lock().get(&partition).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PartitionAdmin for LocalPartitionAdmin {
    async fn join(&self, partition: PartitionId, node: &NodeId) -> Result<(), PartitionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.members.lock().entry(partition).or_default().insert(node.clone());
        Ok(())
    }

    async fn leave(&self, partition: PartitionId, node: &NodeId) -> Result<(), PartitionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let removed = self
            .members
            .lock()
            .get_mut(&partition)
            .is_some_and(|m| m.remove(node));
        if removed {
            Ok(())
        } else {
            Err(PartitionError::NotMember(partition))
        }
    }
}
