//! Compilation error types

use intent_model::{IntentKey, IntentKind, ModelError};

/// Errors raised while compiling an intent
///
/// Every variant is a whole-compile failure: the pipeline never returns a
/// partial installable list.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// No compiler registered for the intent's kind
    #[error("no compiler registered for intent kind '{kind}'")]
    NoCompiler { kind: IntentKind },

    /// A compiler for this kind is already registered
    #[error("compiler for intent kind '{kind}' registered twice")]
    DuplicateCompiler { kind: IntentKind },

    /// Kinds required at start-up are missing from the registry
    #[error("missing compilers for required kinds: {kinds:?}")]
    MissingCompilers { kinds: Vec<IntentKind> },

    /// Topology admits no realization of the intent
    #[error("intent {key} is infeasible: {reason}")]
    Infeasible { key: IntentKey, reason: String },

    /// Intent needs a resource another intent already holds
    #[error("intent {key} conflicts on {resource}")]
    ResourceConflict { key: IntentKey, resource: String },

    /// Compiler returned a payload it does not handle
    #[error("compiler for '{kind}' cannot handle intent {key}")]
    UnsupportedPayload { key: IntentKey, kind: IntentKind },

    /// Recursive compilation did not bottom out in time
    #[error("compilation of {key} exceeded {max_depth} stages")]
    DepthExceeded { key: IntentKey, max_depth: usize },

    /// A derived intent re-derives one of its ancestors
    #[error("compilation cycle detected at {key}")]
    Cycle { key: IntentKey },

    /// Model-level failure (digest encoding)
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl CompileError {
    /// Whether this is a registry misconfiguration rather than an intent problem
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoCompiler { .. } | Self::DuplicateCompiler { .. } | Self::MissingCompilers { .. }
        )
    }

    /// Whether resubmitting could succeed once the topology changes
    #[inline]
    #[must_use]
    pub fn is_topology_dependent(&self) -> bool {
        matches!(self, Self::Infeasible { .. } | Self::ResourceConflict { .. })
    }

    pub(crate) fn infeasible(key: &IntentKey, reason: impl Into<String>) -> Self {
        Self::Infeasible {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}
