//! Read-only topology view consulted by compilers

use intent_model::{ConnectPoint, DeviceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unidirectional link between two ports
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Egress port
    pub src: ConnectPoint,
    /// Ingress port on the far device
    pub dst: ConnectPoint,
    /// Link capacity in Mbps
    pub capacity_mbps: u64,
}

impl Link {
    /// Create a link
    #[inline]
    #[must_use]
    pub fn new(src: ConnectPoint, dst: ConnectPoint, capacity_mbps: u64) -> Self {
        Self {
            src,
            dst,
            capacity_mbps,
        }
    }
}

/// Snapshot of device, port and resource availability
///
/// Implementations must answer deterministically for a given snapshot;
/// compilers rely on that for repeatable output.
pub trait TopologyView: Send + Sync {
    /// Whether the device is known and reachable
    fn contains_device(&self, device: &DeviceId) -> bool;

    /// Outgoing links of a device, in a stable order
    fn neighbours(&self, device: &DeviceId) -> Vec<Link>;

    /// First outgoing link from `src` to `dst`, if any
    fn link_between(&self, src: &DeviceId, dst: &DeviceId) -> Option<Link> {
        self.neighbours(src).into_iter().find(|l| &l.dst.device == dst)
    }

    /// Bandwidth not yet reserved on a link (Mbps)
    fn available_bandwidth(&self, link: &Link) -> u64;
}

/// In-memory topology built up front
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticTopology {
    devices: BTreeSet<DeviceId>,
    links: BTreeMap<DeviceId, BTreeSet<Link>>,
    /// Bandwidth already held by other intents, keyed by (src, dst) connect points
    #[serde(default)]
    reserved: BTreeMap<String, u64>,
}

impl StaticTopology {
    /// Empty topology
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a device
    #[must_use]
    pub fn with_device(mut self, device: impl Into<DeviceId>) -> Self {
        self.devices.insert(device.into());
        self
    }

    /// With a bidirectional link of the given capacity
    #[must_use]
    pub fn with_link(mut self, a: ConnectPoint, b: ConnectPoint, capacity_mbps: u64) -> Self {
        self.devices.insert(a.device.clone());
        self.devices.insert(b.device.clone());
        self.links
            .entry(a.device.clone())
            .or_default()
            .insert(Link::new(a.clone(), b.clone(), capacity_mbps));
        self.links
            .entry(b.device.clone())
            .or_default()
            .insert(Link::new(b, a, capacity_mbps));
        self
    }

    /// With bandwidth on a link already reserved elsewhere
    #[must_use]
    pub fn with_reservation(mut self, link: &Link, mbps: u64) -> Self {
        *self.reserved.entry(Self::link_key(link)).or_default() += mbps;
        self
    }

    /// Chain `s1 - s2 - ... - sN`; port 1 faces the previous switch, port 2 the next
    #[must_use]
    pub fn linear(switches: usize, capacity_mbps: u64) -> Self {
        let mut topo = Self::new();
        for i in 1..=switches {
            topo = topo.with_device(format!("s{i}").as_str());
        }
        for i in 1..switches {
            topo = topo.with_link(
                ConnectPoint::new(format!("s{i}").as_str(), 2),
                ConnectPoint::new(format!("s{}", i + 1).as_str(), 1),
                capacity_mbps,
            );
        }
        topo
    }

    /// Number of devices
    #[inline]
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// All devices, sorted
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.iter()
    }

    fn link_key(link: &Link) -> String {
        format!("{}->{}", link.src, link.dst)
    }
}

impl TopologyView for StaticTopology {
    fn contains_device(&self, device: &DeviceId) -> bool {
        self.devices.contains(device)
    }

    fn neighbours(&self, device: &DeviceId) -> Vec<Link> {
        self.links
            .get(device)
            .map(|links| links.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn available_bandwidth(&self, link: &Link) -> u64 {
        let reserved = self.reserved.get(&Self::link_key(link)).copied().unwrap_or(0);
        link.capacity_mbps.saturating_sub(reserved)
    }
}
