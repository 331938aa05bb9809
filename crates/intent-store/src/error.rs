//! Store error types

use intent_model::{IntentKey, ModelError};
use std::path::PathBuf;

/// Errors returned by store operations
///
/// A version conflict is *not* an error: `write` reports it as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Record's key does not match the key it is written under
    #[error("record for {actual} written under key {expected}")]
    KeyMismatch { expected: IntentKey, actual: IntentKey },

    /// New record does not carry `expected + 1`
    #[error("record version {actual} does not follow expected version {expected:?}")]
    NonSequentialVersion { expected: Option<u64>, actual: u64 },

    /// Model rejected the record
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Snapshot IO failed
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot encoding failed
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
