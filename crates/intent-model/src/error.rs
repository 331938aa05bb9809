//! Error types for the intent model

use crate::state::IntentState;

/// Errors raised by model-level validation
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Transition not present in the lifecycle table
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// State the record is in
        from: IntentState,
        /// State that was requested
        to: IntentState,
    },

    /// Invalid digest length
    #[error("invalid digest length: expected {expected}, got {actual}")]
    InvalidDigest { expected: usize, actual: usize },

    /// Hex decoding failed
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Canonical encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Installable list contains an entry that is not a flow rule
    #[error("installable list for {0} is not fully compiled")]
    NotFullyCompiled(String),

    /// Withdrawal requested for a key with no record
    #[error("no intent recorded under {0}")]
    NothingToWithdraw(String),
}
