//! Error types for the engine
//!
//! Only caller-facing failures surface here. Device and compile failures of an
//! intent become FAILED or CORRUPT records, not errors.

use crate::config::ConfigError;
use intent_compiler::CompileError;
use intent_model::{IntentKey, IntentState, ModelError};
use intent_partition::PartitionError;
use intent_store::StoreError;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Compiler set or compilation failed at a caller-facing boundary
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Store rejected a malformed operation
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Partition membership failed
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    /// Model invariant violated
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// No record and no pending request for the key
    #[error("unknown intent: {0}")]
    UnknownIntent(IntentKey),

    /// Operator reset requested for a record that is not CORRUPT
    #[error("intent {key} is {state}, operator reset requires CORRUPT")]
    NotCorrupt { key: IntentKey, state: IntentState },

    /// Replacement intent names a different key
    #[error("replacement intent has key {found}, expected {expected}")]
    KeyMismatch { expected: IntentKey, found: IntentKey },

    /// Logging could not be initialised
    #[error("logging error: {0}")]
    Logging(String),
}

impl EngineError {
    /// Check if retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Partition(PartitionError::Membership { .. } | PartitionError::AlreadyLeaving(_))
        )
    }

    /// Check if the error reflects a configuration the engine cannot run with
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Logging(_) => true,
            Self::Compile(e) => e.is_configuration(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_model::IntentKind;
    use intent_partition::PartitionId;

    #[test]
    fn missing_compiler_is_terminal() {
        let err: EngineError = CompileError::NoCompiler {
            kind: IntentKind::new("connectivity"),
        }
        .into();
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn membership_failure_is_retryable() {
        let err: EngineError = PartitionError::Membership {
            partition: PartitionId(1),
            reason: "quorum lost".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn not_corrupt_names_state() {
        let err = EngineError::NotCorrupt {
            key: IntentKey::new("k"),
            state: IntentState::Installed,
        };
        assert_eq!(err.to_string(), "intent k is INSTALLED, operator reset requires CORRUPT");
    }
}
