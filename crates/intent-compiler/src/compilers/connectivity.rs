//! Connectivity: endpoint pair to an explicit path intent

use super::{require_devices, unsupported};
use crate::error::CompileError;
use crate::registry::IntentCompiler;
use crate::topology::{Link, TopologyView};
use intent_model::{ConnectPoint, Constraint, DeviceId, Installable, Intent, IntentKind, IntentPayload};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Picks a shortest path honouring the constraints and emits a path intent
///
/// Ties are broken by the topology's neighbour order, so the chosen path is
/// stable for a given snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectivityCompiler;

#[derive(Default)]
struct Limits {
    min_bandwidth: Option<u64>,
    avoid: BTreeSet<DeviceId>,
    max_hops: Option<usize>,
}

impl Limits {
    fn from_constraints(constraints: &[Constraint]) -> Self {
        let mut limits = Self::default();
        for constraint in constraints {
            match constraint {
                Constraint::Bandwidth { mbps } => {
                    limits.min_bandwidth = Some(limits.min_bandwidth.map_or(*mbps, |b| b.max(*mbps)));
                }
                Constraint::Avoid { devices } => limits.avoid.extend(devices.iter().cloned()),
                Constraint::MaxHops { hops } => {
                    limits.max_hops = Some(limits.max_hops.map_or(*hops, |h| h.min(*hops)));
                }
            }
        }
        limits
    }

    fn admits(&self, link: &Link, topology: &dyn TopologyView) -> bool {
        if self.avoid.contains(&link.dst.device) {
            return false;
        }
        self.min_bandwidth
            .map_or(true, |bw| topology.available_bandwidth(link) >= bw)
    }
}

fn shortest_path(
    topology: &dyn TopologyView,
    src: &DeviceId,
    dst: &DeviceId,
    limits: &Limits,
) -> Option<Vec<Link>> {
    let mut reached_by: BTreeMap<DeviceId, Link> = BTreeMap::new();
    let mut visited = BTreeSet::from([src.clone()]);
    let mut queue = VecDeque::from([src.clone()]);

    while let Some(device) = queue.pop_front() {
        if &device == dst {
            break;
        }
        for link in topology.neighbours(&device) {
            let next = link.dst.device.clone();
            if visited.contains(&next) || !limits.admits(&link, topology) {
                continue;
            }
            visited.insert(next.clone());
            reached_by.insert(next.clone(), link);
            queue.push_back(next);
        }
    }

    let mut links = Vec::new();
    let mut cursor = dst.clone();
    while &cursor != src {
        let link = reached_by.remove(&cursor)?;
        cursor = link.src.device.clone();
        links.push(link);
    }
    links.reverse();
    Some(links)
}

impl IntentCompiler for ConnectivityCompiler {
    fn kind(&self) -> IntentKind {
        IntentKind::new(IntentKind::CONNECTIVITY)
    }

    fn compile(&self, intent: &Intent, topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
        let IntentPayload::Connectivity {
            src,
            dst,
            selector,
            constraints,
        } = &intent.payload
        else {
            return Err(unsupported(intent, IntentKind::CONNECTIVITY));
        };
        require_devices(intent, topology, [&src.device, &dst.device])?;

        let limits = Limits::from_constraints(constraints);
        if limits.avoid.contains(&src.device) || limits.avoid.contains(&dst.device) {
            return Err(CompileError::infeasible(&intent.key, "an endpoint is on the avoid list"));
        }

        let links = shortest_path(topology, &src.device, &dst.device, &limits)
            .ok_or_else(|| CompileError::infeasible(&intent.key, format!("no path from {src} to {dst}")))?;

        if let Some(max) = limits.max_hops {
            if links.len() > max {
                return Err(CompileError::infeasible(
                    &intent.key,
                    format!("shortest path has {} links, limit is {max}", links.len()),
                ));
            }
        }

        let mut hops: Vec<ConnectPoint> = Vec::with_capacity(links.len() * 2 + 2);
        hops.push(src.clone());
        for link in &links {
            hops.push(link.src.clone());
            hops.push(link.dst.clone());
        }
        hops.push(dst.clone());

        let path = IntentPayload::Path {
            hops,
            selector: selector.clone(),
            bandwidth: limits.min_bandwidth,
        };
        Ok(vec![Installable::from(intent.derive("path", path))])
    }
}
