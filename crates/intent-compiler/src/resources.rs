//! Bandwidth reservations shared by every replica
//!
//! Compilers stay pure: they read a [`ReservedView`], a snapshot of the
//! topology with other intents' reservations subtracted. The pipeline then
//! admits the finished compilation against the live ledger, atomically, so
//! two intents compiled from the same snapshot cannot both claim the last of
//! a link.

use crate::error::CompileError;
use crate::topology::{Link, TopologyView};
use intent_model::{ConnectPoint, DeviceId, Intent, IntentKey, IntentPayload};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Directed link endpoints
type LinkEnds = (ConnectPoint, ConnectPoint);

/// Bandwidth an intent needs on one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Egress port of the link
    pub src: ConnectPoint,
    /// Ingress port at the far end
    pub dst: ConnectPoint,
    /// Requested bandwidth (Mbps)
    pub mbps: u64,
}

impl Claim {
    /// Claims of a path intent that asks for bandwidth
    ///
    /// Empty for every other payload.
    #[must_use]
    pub fn of(intent: &Intent) -> Vec<Self> {
        let IntentPayload::Path {
            hops,
            bandwidth: Some(mbps),
            ..
        } = &intent.payload
        else {
            return Vec::new();
        };
        let pairs: Vec<_> = hops.chunks_exact(2).collect();
        pairs
            .windows(2)
            .map(|w| Self {
                src: w[0][1].clone(),
                dst: w[1][0].clone(),
                mbps: *mbps,
            })
            .collect()
    }
}

/// Cluster-wide bandwidth ledger, one entry per owning intent
#[derive(Debug, Default)]
pub struct BandwidthLedger {
    held: Mutex<BTreeMap<IntentKey, Vec<Claim>>>,
}

impl BandwidthLedger {
    /// Empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bandwidth reserved per link by everyone except `owner`
    #[must_use]
    pub fn reserved_by_others(&self, owner: &IntentKey) -> BTreeMap<LinkEnds, u64> {
        totals(self.held.lock().iter().filter(|(k, _)| *k != owner).flat_map(|(_, c)| c))
    }

    /// Replace `owner`'s reservation with `claims` if every link still has room
    ///
    /// # Errors
    /// [`CompileError::ResourceConflict`] naming the first oversubscribed
    /// link; the previous reservation is kept
    pub fn reserve(
        &self,
        owner: &IntentKey,
        claims: Vec<Claim>,
        topology: &dyn TopologyView,
    ) -> Result<(), CompileError> {
        let mut held = self.held.lock();
        let others = totals(held.iter().filter(|(k, _)| *k != owner).flat_map(|(_, c)| c));
        for ((src, dst), wanted) in totals(&claims) {
            let capacity = link(topology, &src, &dst).map_or(0, |l| topology.available_bandwidth(&l));
            let taken = others.get(&(src.clone(), dst.clone())).copied().unwrap_or(0);
            if taken.saturating_add(wanted) > capacity {
                return Err(CompileError::ResourceConflict {
                    key: owner.clone(),
                    resource: format!("bandwidth on {src} -> {dst} ({taken} of {capacity} Mbps held)"),
                });
            }
        }
        if claims.is_empty() {
            held.remove(owner);
        } else {
            tracing::debug!(%owner, links = claims.len(), "bandwidth reserved");
            held.insert(owner.clone(), claims);
        }
        Ok(())
    }

    /// Drop whatever `owner` holds
    pub fn release(&self, owner: &IntentKey) {
        if self.held.lock().remove(owner).is_some() {
            tracing::debug!(%owner, "bandwidth released");
        }
    }

    /// Claims currently held by `owner`
    #[must_use]
    pub fn held_by(&self, owner: &IntentKey) -> Vec<Claim> {
        self.held.lock().get(owner).cloned().unwrap_or_default()
    }
}

fn totals<'a>(claims: impl IntoIterator<Item = &'a Claim>) -> BTreeMap<LinkEnds, u64> {
    let mut sum = BTreeMap::new();
    for claim in claims {
        *sum.entry((claim.src.clone(), claim.dst.clone())).or_insert(0u64) += claim.mbps;
    }
    sum
}

fn link(topology: &dyn TopologyView, src: &ConnectPoint, dst: &ConnectPoint) -> Option<Link> {
    topology
        .neighbours(&src.device)
        .into_iter()
        .find(|l| &l.src == src && &l.dst == dst)
}

/// Topology snapshot with other intents' reservations subtracted
pub struct ReservedView<'a> {
    base: &'a dyn TopologyView,
    reserved: BTreeMap<LinkEnds, u64>,
}

impl<'a> ReservedView<'a> {
    /// Snapshot `ledger` as seen by `owner`
    #[must_use]
    pub fn new(base: &'a dyn TopologyView, ledger: &BandwidthLedger, owner: &IntentKey) -> Self {
        Self {
            base,
            reserved: ledger.reserved_by_others(owner),
        }
    }

    /// `base` as is
    #[inline]
    #[must_use]
    pub fn unreserved(base: &'a dyn TopologyView) -> Self {
        Self {
            base,
            reserved: BTreeMap::new(),
        }
    }
}

impl TopologyView for ReservedView<'_> {
    fn contains_device(&self, device: &DeviceId) -> bool {
        self.base.contains_device(device)
    }

    fn neighbours(&self, device: &DeviceId) -> Vec<Link> {
        self.base.neighbours(device)
    }

    fn available_bandwidth(&self, link: &Link) -> u64 {
        let held = self
            .reserved
            .get(&(link.src.clone(), link.dst.clone()))
            .copied()
            .unwrap_or(0);
        self.base.available_bandwidth(link).saturating_sub(held)
    }
}
