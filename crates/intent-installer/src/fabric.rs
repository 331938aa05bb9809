//! Simulated device-programming service
//!
//! Holds one rule table per device. Adds and removes are idempotent, so a
//! batch replayed after an ambiguous outcome changes nothing the second time.
//! Faults can be scripted per batch, pinned to a device, or drawn at random
//! from a seeded generator.

use crate::batch::{BatchReport, DeviceProgrammer, FlowBatch, ReportStatus};
use intent_model::{DeviceId, FlowOp, FlowRule, FlowRuleId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Scripted misbehaviour for the next batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Apply all but the last operation and report it refused
    PartialFailure,
    /// Apply nothing and report every operation refused
    TotalFailure,
    /// Apply nothing and report the devices unreachable
    Unreachable,
    /// Apply everything but never report
    DropCallback,
    /// Report only after the delay
    Delay(Duration),
}

type RuleTable = BTreeMap<FlowRuleId, FlowRule>;

#[derive(Debug)]
struct FabricState {
    tables: Mutex<BTreeMap<DeviceId, RuleTable>>,
    scripted: Mutex<VecDeque<Fault>>,
    broken: Mutex<BTreeSet<DeviceId>>,
    random: Mutex<Option<(f64, StdRng)>>,
    changes: AtomicU64,
    batches: AtomicU64,
}

/// In-memory fabric implementing [`DeviceProgrammer`]
#[derive(Debug, Clone)]
pub struct InMemoryFabric {
    state: Arc<FabricState>,
}

impl Default for InMemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFabric {
    /// Create a fabric that acknowledges everything
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(FabricState {
                tables: Mutex::new(BTreeMap::new()),
                scripted: Mutex::new(VecDeque::new()),
                broken: Mutex::new(BTreeSet::new()),
                random: Mutex::new(None),
                changes: AtomicU64::new(0),
                batches: AtomicU64::new(0),
            }),
        }
    }

    /// With a random transient fault rate drawn from a seeded generator
    #[must_use]
    pub fn with_fault_rate(self, rate: f64, seed: u64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        *self.state.random.lock() = Some((rate, StdRng::seed_from_u64(seed)));
        self
    }

    /// Queue a fault; each batch consumes at most one
    pub fn inject(&self, fault: Fault) {
        self.state.scripted.lock().push_back(fault);
    }

    /// Refuse every operation targeting `device` until healed
    pub fn break_device(&self, device: impl Into<DeviceId>) {
        self.state.broken.lock().insert(device.into());
    }

    /// Stop refusing operations on `device`
    pub fn heal_device(&self, device: &DeviceId) {
        self.state.broken.lock().remove(device);
    }

    /// Rules currently on a device, ordered by id
    #[must_use]
    pub fn rules_on(&self, device: &DeviceId) -> Vec<FlowRule> {
        self.state
            .tables
            .lock()
            .get(device)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the rule is present on its device
    #[must_use]
    pub fn contains(&self, rule: &FlowRule) -> bool {
        self.state
            .tables
            .lock()
            .get(&rule.device)
            .is_some_and(|t| t.contains_key(&rule.id()))
    }

    /// Total rules across devices
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.state.tables.lock().values().map(BTreeMap::len).sum()
    }

    /// Rule ids per device
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<DeviceId, Vec<FlowRuleId>> {
        self.state
            .tables
            .lock()
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(d, t)| (d.clone(), t.keys().copied().collect()))
            .collect()
    }

    /// Number of operations that changed some table
    #[inline]
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.state.changes.load(Ordering::Relaxed)
    }

    /// Number of batches received
    #[inline]
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.state.batches.load(Ordering::Relaxed)
    }

    fn next_fault(&self) -> Option<Fault> {
        if let Some(fault) = self.state.scripted.lock().pop_front() {
            return Some(fault);
        }
        let mut random = self.state.random.lock();
        let (rate, rng) = random.as_mut()?;
        rng.gen_bool(*rate).then_some(Fault::Unreachable)
    }
}

impl FabricState {
    /// Apply one operation; returns whether the device accepted it
    fn apply_op(&self, op: &FlowOp) -> bool {
        let rule = op.rule();
        if self.broken.lock().contains(&rule.device) {
            return false;
        }
        let mut tables = self.tables.lock();
        let table = tables.entry(rule.device.clone()).or_default();
        let changed = match op {
            FlowOp::Add(rule) => table.insert(rule.id(), rule.clone()).is_none(),
            FlowOp::Remove(rule) => table.remove(&rule.id()).is_some(),
        };
        if changed {
            self.changes.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    fn execute(&self, batch: &FlowBatch, fault: Option<&Fault>) -> Option<BatchReport> {
        let refused_all = || batch.ops.iter().map(FlowOp::id).collect::<Vec<_>>();
        let status = match fault {
            Some(Fault::Unreachable) => ReportStatus::Unreachable {
                reason: "devices unreachable".into(),
            },
            Some(Fault::TotalFailure) => ReportStatus::Completed { failed: refused_all() },
            Some(Fault::PartialFailure) => {
                let (last, rest) = batch.ops.split_last()?;
                let mut failed: Vec<FlowRuleId> =
                    rest.iter().filter(|op| !self.apply_op(op)).map(FlowOp::id).collect();
                failed.push(last.id());
                ReportStatus::Completed { failed }
            }
            Some(Fault::DropCallback) => {
                for op in &batch.ops {
                    self.apply_op(op);
                }
                return None;
            }
            Some(Fault::Delay(_)) | None => {
                let failed = batch
                    .ops
                    .iter()
                    .filter(|op| !self.apply_op(op))
                    .map(FlowOp::id)
                    .collect();
                ReportStatus::Completed { failed }
            }
        };
        Some(BatchReport {
            batch_id: batch.id,
            status,
        })
    }
}

impl DeviceProgrammer for InMemoryFabric {
    fn submit_batch(&self, batch: FlowBatch, reply: oneshot::Sender<BatchReport>) {
        self.state.batches.fetch_add(1, Ordering::Relaxed);
        let fault = self.next_fault();
        if let Some(fault) = &fault {
            tracing::debug!(batch_id = batch.id, ?fault, "injecting fault");
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if let Some(Fault::Delay(delay)) = &fault {
                tokio::time::sleep(*delay).await;
            }
            if let Some(report) = state.execute(&batch, fault.as_ref()) {
                let _ = reply.send(report);
            }
        });
    }
}
