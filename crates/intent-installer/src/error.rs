//! Installer error types

use std::time::Duration;

/// Errors raised while waiting for a batch outcome
///
/// All of these leave the batch outcome unknown. Device operations are
/// idempotent, so the caller may resubmit the same batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstallError {
    /// No report arrived in time
    #[error("batch {batch_id} timed out after {after:?}")]
    Timeout { batch_id: u64, after: Duration },

    /// The programmer dropped the reply channel without reporting
    #[error("callback for batch {batch_id} was lost")]
    CallbackLost { batch_id: u64 },

    /// Devices were temporarily unreachable
    #[error("batch {batch_id} hit a transient device error: {reason}")]
    Transient { batch_id: u64, reason: String },
}

impl InstallError {
    /// Whether resubmitting may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::CallbackLost { .. } | Self::Transient { .. }
        )
    }

    /// Batch the error concerns
    #[inline]
    #[must_use]
    pub fn batch_id(&self) -> u64 {
        match self {
            Self::Timeout { batch_id, .. }
            | Self::CallbackLost { batch_id }
            | Self::Transient { batch_id, .. } => *batch_id,
        }
    }
}
