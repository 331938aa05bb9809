//! Batches, reports and the device-programming contract

use intent_model::{FlowOp, FlowRule, FlowRuleId};
use std::collections::HashSet;
use tokio::sync::oneshot;

/// Operations submitted together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBatch {
    pub id: u64,
    pub ops: Vec<FlowOp>,
}

/// What the devices did with a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// Every device answered; `failed` lists operations that were refused
    Completed { failed: Vec<FlowRuleId> },
    /// Devices could not be reached; nothing was applied
    Unreachable { reason: String },
}

/// Asynchronous answer to a submitted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: u64,
    pub status: ReportStatus,
}

impl BatchReport {
    /// Every operation acknowledged
    #[inline]
    #[must_use]
    pub fn acknowledged(batch_id: u64) -> Self {
        Self {
            batch_id,
            status: ReportStatus::Completed { failed: Vec::new() },
        }
    }
}

/// Aggregate outcome of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every operation acknowledged by its target device
    Success,
    /// A strict subset failed
    PartialFailure { failed: Vec<FlowRuleId> },
    /// Nothing was applied
    TotalFailure,
}

impl BatchOutcome {
    /// Classify the failures of a batch of `total` operations
    #[must_use]
    pub fn classify(total: usize, failed: Vec<FlowRuleId>) -> Self {
        if failed.is_empty() {
            Self::Success
        } else if failed.len() >= total {
            Self::TotalFailure
        } else {
            Self::PartialFailure { failed }
        }
    }

    /// Partial failures count as failures: mixed state is never accepted
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Southbound device-programming service
///
/// `submit_batch` must return immediately; the report is delivered later
/// through `reply`. Implementations guarantee per-batch atomicity on each
/// target device or report the refused operations explicitly. Adding a rule
/// that is present, or removing one that is absent, must be a no-op.
pub trait DeviceProgrammer: Send + Sync {
    /// Submit a batch
    fn submit_batch(&self, batch: FlowBatch, reply: oneshot::Sender<BatchReport>);
}

/// Operations moving devices from `old` rules to `new` rules
///
/// Removals of rules no longer wanted come first, then additions of rules not
/// yet present. Rules common to both are left alone.
#[must_use]
pub fn transition_ops(old: Option<&[FlowRule]>, new: &[FlowRule]) -> Vec<FlowOp> {
    let old = old.unwrap_or_default();
    let old_ids: HashSet<FlowRuleId> = old.iter().map(FlowRule::id).collect();
    let new_ids: HashSet<FlowRuleId> = new.iter().map(FlowRule::id).collect();

    let removals = old
        .iter()
        .filter(|r| !new_ids.contains(&r.id()))
        .cloned()
        .map(FlowOp::Remove);
    let additions = new
        .iter()
        .filter(|r| !old_ids.contains(&r.id()))
        .cloned()
        .map(FlowOp::Add);
    removals.chain(additions).collect()
}

/// Operations removing every rule in `rules`
#[must_use]
pub fn removal_ops(rules: &[FlowRule]) -> Vec<FlowOp> {
    rules.iter().cloned().map(FlowOp::Remove).collect()
}
