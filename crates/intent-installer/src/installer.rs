//! Batch executor
//!
//! Submits one batch, suspends until the device callback arrives, and maps the
//! report to an aggregate outcome. No retries happen here; retry policy belongs
//! to the caller.

use crate::batch::{BatchOutcome, BatchReport, DeviceProgrammer, FlowBatch, ReportStatus};
use crate::error::InstallError;
use intent_model::FlowOp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default wait for a batch report
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Applies operation lists as atomic batches
pub struct Installer {
    programmer: Arc<dyn DeviceProgrammer>,
    timeout: Duration,
    next_batch: AtomicU64,
}

impl Installer {
    /// Create installer with the default timeout
    #[must_use]
    pub fn new(programmer: Arc<dyn DeviceProgrammer>) -> Self {
        Self {
            programmer,
            timeout: DEFAULT_INSTALL_TIMEOUT,
            next_batch: AtomicU64::new(1),
        }
    }

    /// With report timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Report timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Apply `ops` as one batch and wait for the outcome
    ///
    /// An empty list succeeds without contacting any device.
    ///
    /// # Errors
    /// Returns [`InstallError`] when the outcome is unknown (timeout, lost
    /// callback, unreachable devices)
    pub async fn apply(&self, ops: Vec<FlowOp>) -> Result<BatchOutcome, InstallError> {
        if ops.is_empty() {
            return Ok(BatchOutcome::Success);
        }

        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let total = ops.len();
        let (reply, report) = oneshot::channel();

        tracing::debug!(batch_id, ops = total, "submitting batch");
        self.programmer.submit_batch(FlowBatch { id: batch_id, ops }, reply);

        let report = match tokio::time::timeout(self.timeout, report).await {
            Err(_) => {
                return Err(InstallError::Timeout {
                    batch_id,
                    after: self.timeout,
                })
            }
            Ok(Err(_)) => return Err(InstallError::CallbackLost { batch_id }),
            Ok(Ok(report)) => report,
        };

        Self::interpret(batch_id, total, report)
    }

    fn interpret(batch_id: u64, total: usize, report: BatchReport) -> Result<BatchOutcome, InstallError> {
        match report.status {
            ReportStatus::Unreachable { reason } => Err(InstallError::Transient { batch_id, reason }),
            ReportStatus::Completed { failed } => {
                let outcome = BatchOutcome::classify(total, failed);
                if !outcome.is_success() {
                    tracing::debug!(batch_id, ?outcome, "batch not fully applied");
                }
                Ok(outcome)
            }
        }
    }
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("timeout", &self.timeout)
            .field("next_batch", &self.next_batch)
            .finish_non_exhaustive()
    }
}
