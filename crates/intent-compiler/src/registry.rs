//! Compiler registry
//!
//! One compiler per intent kind. Registration happens at start-up; an intent
//! whose kind has no compiler is a configuration error.

use crate::compilers::{
    ConnectivityCompiler, FlowObjectiveCompiler, IsolationCompiler, PathCompiler,
};
use crate::error::CompileError;
use crate::topology::TopologyView;
use intent_model::{Installable, Intent, IntentKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Translates one intent kind into installables
///
/// Implementations must be pure functions of `(intent, topology)`: no device
/// I/O and no hidden state, so the same inputs always give the same output.
/// Returning further intents asks the pipeline for another stage.
pub trait IntentCompiler: Send + Sync {
    /// Kind this compiler handles
    fn kind(&self) -> IntentKind;

    /// Compile one stage
    ///
    /// # Errors
    /// Returns error if the topology admits no realization
    fn compile(&self, intent: &Intent, topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError>;
}

/// Mapping from intent kind to compiler
#[derive(Default, Clone)]
pub struct CompilerRegistry {
    compilers: HashMap<IntentKind, Arc<dyn IntentCompiler>>,
}

impl CompilerRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            compilers: HashMap::new(),
        }
    }

    /// Registry with connectivity, path, isolation and flow-objective compilers
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn IntentCompiler>; 4] = [
            Arc::new(ConnectivityCompiler),
            Arc::new(PathCompiler),
            Arc::new(IsolationCompiler),
            Arc::new(FlowObjectiveCompiler),
        ];
        for compiler in builtins {
            registry.compilers.insert(compiler.kind(), compiler);
        }
        registry
    }

    /// Register a compiler
    ///
    /// # Errors
    /// Returns [`CompileError::DuplicateCompiler`] if the kind is taken
    pub fn register(&mut self, compiler: Arc<dyn IntentCompiler>) -> Result<(), CompileError> {
        let kind = compiler.kind();
        if self.compilers.contains_key(&kind) {
            return Err(CompileError::DuplicateCompiler { kind });
        }
        self.compilers.insert(kind, compiler);
        Ok(())
    }

    /// Remove the compiler for a kind
    #[inline]
    pub fn unregister(&mut self, kind: &IntentKind) -> bool {
        self.compilers.remove(kind).is_some()
    }

    /// Compiler for a kind
    #[inline]
    #[must_use]
    pub fn get(&self, kind: &IntentKind) -> Option<Arc<dyn IntentCompiler>> {
        self.compilers.get(kind).cloned()
    }

    /// Check if a kind has a compiler
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: &IntentKind) -> bool {
        self.compilers.contains_key(kind)
    }

    /// Load-time check that every required kind is covered
    ///
    /// # Errors
    /// Returns [`CompileError::MissingCompilers`] listing the uncovered kinds
    pub fn ensure_registered<'a, I>(&self, kinds: I) -> Result<(), CompileError>
    where
        I: IntoIterator<Item = &'a IntentKind>,
    {
        let mut missing: Vec<IntentKind> = kinds
            .into_iter()
            .filter(|k| !self.contains(k))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            missing.dedup();
            Err(CompileError::MissingCompilers { kinds: missing })
        }
    }

    /// Registered kinds, sorted
    #[must_use]
    pub fn kinds(&self) -> Vec<IntentKind> {
        let mut kinds: Vec<IntentKind> = self.compilers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Number of registered compilers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.compilers.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compilers.is_empty()
    }
}

impl fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl IntentCompiler for Noop {
        fn kind(&self) -> IntentKind {
            IntentKind::new(self.0)
        }

        fn compile(&self, _intent: &Intent, _topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn registry_new_empty() {
        let registry = CompilerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registry_with_builtins() {
        let registry = CompilerRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains(&IntentKind::new(IntentKind::CONNECTIVITY)));
        assert!(registry.contains(&IntentKind::new(IntentKind::FLOW_OBJECTIVE)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = CompilerRegistry::new();
        registry.register(Arc::new(Noop("custom"))).unwrap();
        let err = registry.register(Arc::new(Noop("custom"))).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn ensure_registered_lists_missing_kinds() {
        let registry = CompilerRegistry::with_builtins();
        let required = [IntentKind::new("path"), IntentKind::new("mpls"), IntentKind::new("mpls")];

        match registry.ensure_registered(&required) {
            Err(CompileError::MissingCompilers { kinds }) => {
                assert_eq!(kinds, vec![IntentKind::new("mpls")]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unregister_removes_kind() {
        let mut registry = CompilerRegistry::with_builtins();
        assert!(registry.unregister(&IntentKind::new(IntentKind::PATH)));
        assert!(!registry.contains(&IntentKind::new(IntentKind::PATH)));
        assert!(!registry.unregister(&IntentKind::new(IntentKind::PATH)));
    }
}
