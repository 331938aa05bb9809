//! Compiler pipeline
//!
//! Dispatches each intent to its registered compiler and recurses into
//! derived intents until only flow rules remain. Recursion is bounded by
//! `max_depth` stages, and a derived intent whose payload matches one of its
//! ancestors is reported as a cycle instead of looping.
//!
//! Every emitted rule is stamped with the root intent's key, so two intents
//! compiling to the same match and actions still own separate device entries.
//! With a [`BandwidthLedger`] attached, compilers see the topology minus
//! other intents' reservations, and a finished compilation is admitted
//! against the ledger before it is handed back.

use crate::error::CompileError;
use crate::registry::CompilerRegistry;
use crate::resources::{BandwidthLedger, Claim, ReservedView};
use crate::topology::TopologyView;
use intent_model::{Digest, FlowRule, FlowRuleId, Installable, Intent, IntentData, IntentKey};
use std::collections::HashSet;
use std::sync::Arc;

/// Default bound on compilation stages
pub const DEFAULT_MAX_COMPILE_DEPTH: usize = 10;

/// Registry plus topology snapshot, ready to compile
#[derive(Clone)]
pub struct CompilerPipeline {
    registry: Arc<CompilerRegistry>,
    topology: Arc<dyn TopologyView>,
    ledger: Option<Arc<BandwidthLedger>>,
    max_depth: usize,
}

impl CompilerPipeline {
    /// Create pipeline with the default depth bound
    #[must_use]
    pub fn new(registry: Arc<CompilerRegistry>, topology: Arc<dyn TopologyView>) -> Self {
        Self {
            registry,
            topology,
            ledger: None,
            max_depth: DEFAULT_MAX_COMPILE_DEPTH,
        }
    }

    /// With max compilation depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With bandwidth reservations shared with other pipelines
    #[inline]
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<BandwidthLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Stage bound
    #[inline]
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Registered compilers
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &CompilerRegistry {
        &self.registry
    }

    /// Run a single compilation stage
    ///
    /// Rules in the output are owned by `intent`. If the stage already
    /// produced only rules, its bandwidth is admitted as well.
    ///
    /// # Errors
    /// - [`CompileError::NoCompiler`] if the kind is unregistered
    /// - [`CompileError::ResourceConflict`] if admission oversubscribes a link
    /// - Whatever the kind's compiler reports
    pub fn compile_stage(&self, intent: &Intent) -> Result<Vec<Installable>, CompileError> {
        let view = self.view(&intent.key);
        let out: Vec<Installable> = self
            .stage(intent, &view)?
            .into_iter()
            .map(|item| match item {
                Installable::Rule(rule) => Installable::Rule(rule.owned_by(intent.key.clone())),
                other => other,
            })
            .collect();
        if out.iter().all(Installable::is_installer_ready) {
            self.admit(&intent.key, Claim::of(intent))?;
        }
        Ok(out)
    }

    /// Compile until every installable is a flow rule
    ///
    /// # Errors
    /// Any stage error, [`CompileError::DepthExceeded`], [`CompileError::Cycle`]
    /// or [`CompileError::ResourceConflict`]
    pub fn compile(&self, intent: &Intent) -> Result<Vec<Installable>, CompileError> {
        let view = self.view(&intent.key);
        let mut chain = Vec::new();
        let mut out = RuleSet::new(intent.key.clone());
        self.compile_into(intent, 0, &view, &mut chain, &mut out)?;
        self.admit(&intent.key, out.claims.clone())?;
        Ok(out.into_installables())
    }

    /// Finish compiling the output of an earlier stage of `root`
    ///
    /// Rules pass through; intents are compiled one stage deeper than `root`.
    ///
    /// # Errors
    /// As [`compile`](Self::compile)
    pub fn compile_frontier(
        &self,
        root: &Intent,
        frontier: &[Installable],
    ) -> Result<Vec<Installable>, CompileError> {
        let view = self.view(&root.key);
        let mut chain = vec![root.payload_digest()?];
        let mut out = RuleSet::new(root.key.clone());
        out.claims.extend(Claim::of(root));
        for item in frontier {
            match item {
                Installable::Rule(rule) => out.push(rule.clone()),
                Installable::Intent(child) => self.compile_into(child, 1, &view, &mut chain, &mut out)?,
            }
        }
        self.admit(&root.key, out.claims.clone())?;
        Ok(out.into_installables())
    }

    /// Give up the bandwidth held for `owner`
    pub fn release(&self, owner: &IntentKey) {
        if let Some(ledger) = &self.ledger {
            ledger.release(owner);
        }
    }

    /// Reverse compilation: the rules to remove when withdrawing `data`
    ///
    /// Empty if nothing was ever installed.
    ///
    /// # Errors
    /// [`CompileError::Infeasible`] if an installed rule targets a device the
    /// topology no longer knows, since its removal cannot be addressed
    pub fn uninstall_plan(&self, data: &IntentData) -> Result<Vec<Installable>, CompileError> {
        let Some(installed) = data.installed() else {
            return Ok(Vec::new());
        };
        for rule in installed {
            if !self.topology.contains_device(&rule.device) {
                return Err(CompileError::infeasible(
                    data.key(),
                    format!("installed rule {} targets unknown device {}", rule.id(), rule.device),
                ));
            }
        }
        Ok(installed.iter().cloned().map(Installable::Rule).collect())
    }

    fn stage(&self, intent: &Intent, view: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
        let kind = intent.kind();
        let compiler = self
            .registry
            .get(&kind)
            .ok_or(CompileError::NoCompiler { kind })?;
        compiler.compile(intent, view)
    }

    fn view(&self, owner: &IntentKey) -> ReservedView<'_> {
        match &self.ledger {
            Some(ledger) => ReservedView::new(self.topology.as_ref(), ledger, owner),
            None => ReservedView::unreserved(self.topology.as_ref()),
        }
    }

    fn admit(&self, owner: &IntentKey, claims: Vec<Claim>) -> Result<(), CompileError> {
        match &self.ledger {
            Some(ledger) => ledger.reserve(owner, claims, self.topology.as_ref()),
            None => Ok(()),
        }
    }

    fn compile_into(
        &self,
        intent: &Intent,
        depth: usize,
        view: &dyn TopologyView,
        chain: &mut Vec<Digest>,
        out: &mut RuleSet,
    ) -> Result<(), CompileError> {
        if depth >= self.max_depth {
            return Err(CompileError::DepthExceeded {
                key: intent.key.clone(),
                max_depth: self.max_depth,
            });
        }
        let digest = intent.payload_digest()?;
        if chain.contains(&digest) {
            return Err(CompileError::Cycle {
                key: intent.key.clone(),
            });
        }

        chain.push(digest);
        out.claims.extend(Claim::of(intent));
        for item in self.stage(intent, view)? {
            match item {
                Installable::Rule(rule) => out.push(rule),
                Installable::Intent(child) => self.compile_into(&child, depth + 1, view, chain, out)?,
            }
        }
        chain.pop();

        tracing::trace!(key = %intent.key, depth, "compiled stage");
        Ok(())
    }
}

impl std::fmt::Debug for CompilerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerPipeline")
            .field("registry", &self.registry)
            .field("max_depth", &self.max_depth)
            .field("ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

/// Ordered rule list of one owner, without duplicates
struct RuleSet {
    owner: IntentKey,
    seen: HashSet<FlowRuleId>,
    rules: Vec<FlowRule>,
    claims: Vec<Claim>,
}

impl RuleSet {
    fn new(owner: IntentKey) -> Self {
        Self {
            owner,
            seen: HashSet::new(),
            rules: Vec::new(),
            claims: Vec::new(),
        }
    }

    fn push(&mut self, rule: FlowRule) {
        let rule = rule.owned_by(self.owner.clone());
        if self.seen.insert(rule.id()) {
            self.rules.push(rule);
        }
    }

    fn into_installables(self) -> Vec<Installable> {
        self.rules.into_iter().map(Installable::Rule).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IntentCompiler;
    use crate::topology::StaticTopology;
    use intent_model::{AppId, ConnectPoint, Constraint, IntentKey, IntentKind, IntentPayload, IntentState};
    use std::collections::BTreeMap;

    /// Compiler that wraps its input into a fresh intent of the same kind
    struct Deepening;

    impl IntentCompiler for Deepening {
        fn kind(&self) -> IntentKind {
            IntentKind::new("deepening")
        }

        fn compile(&self, intent: &Intent, _topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
            let IntentPayload::Custom { kind, params } = &intent.payload else {
                return Ok(Vec::new());
            };
            let mut params = params.clone();
            let level = params.get("level").and_then(serde_json::Value::as_u64).unwrap_or(0);
            params.insert("level".into(), serde_json::Value::from(level + 1));
            let child = intent.derive("deeper", IntentPayload::Custom { kind: kind.clone(), params });
            Ok(vec![child.into()])
        }
    }

    /// Compiler that re-emits its own input
    struct Looping;

    impl IntentCompiler for Looping {
        fn kind(&self) -> IntentKind {
            IntentKind::new("looping")
        }

        fn compile(&self, intent: &Intent, _topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
            Ok(vec![intent.derive("again", intent.payload.clone()).into()])
        }
    }

    fn custom(kind: &str) -> Intent {
        Intent::new(
            IntentKey::new("x"),
            AppId::new("app"),
            IntentPayload::Custom {
                kind: kind.into(),
                params: BTreeMap::new(),
            },
        )
    }

    fn pipeline() -> CompilerPipeline {
        let mut registry = CompilerRegistry::with_builtins();
        registry.register(Arc::new(Deepening)).unwrap();
        registry.register(Arc::new(Looping)).unwrap();
        CompilerPipeline::new(Arc::new(registry), Arc::new(StaticTopology::linear(3, 1000)))
    }

    fn connectivity() -> Intent {
        Intent::new(
            IntentKey::new("k"),
            AppId::new("app"),
            IntentPayload::connectivity(ConnectPoint::new("s1", 10), ConnectPoint::new("s3", 10)),
        )
    }

    #[test]
    fn unregistered_kind_is_configuration_error() {
        let pipeline = CompilerPipeline::new(
            Arc::new(CompilerRegistry::new()),
            Arc::new(StaticTopology::linear(2, 100)),
        );
        let err = pipeline.compile(&connectivity()).unwrap_err();
        assert!(matches!(err, CompileError::NoCompiler { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn connectivity_compiles_down_to_rules() {
        let stage = pipeline().compile_stage(&connectivity()).unwrap();
        assert!(!stage[0].is_installer_ready());

        let full = pipeline().compile(&connectivity()).unwrap();
        assert_eq!(full.len(), 3);
        assert!(full.iter().all(Installable::is_installer_ready));
    }

    #[test]
    fn frontier_completion_matches_full_compile() {
        let p = pipeline();
        let stage = p.compile_stage(&connectivity()).unwrap();
        assert_eq!(p.compile_frontier(&connectivity(), &stage).unwrap(), p.compile(&connectivity()).unwrap());
    }

    #[test]
    fn rules_are_owned_by_the_root_intent() {
        let full = pipeline().compile(&connectivity()).unwrap();
        let rules = Installable::rules_of(&full).unwrap();
        assert!(rules.iter().all(|r| r.owner == Some(IntentKey::new("k"))));

        let mut other = connectivity();
        other.key = IntentKey::new("k2");
        let theirs = Installable::rules_of(&pipeline().compile(&other).unwrap()).unwrap();
        assert!(rules.iter().zip(&theirs).all(|(a, b)| a.id() != b.id()));
    }

    #[test]
    fn ledger_refuses_a_second_oversubscribing_intent() {
        let ledger = Arc::new(BandwidthLedger::new());
        let p = pipeline().with_ledger(Arc::clone(&ledger));
        let wide = |key: &str| {
            let mut intent = connectivity();
            intent.key = IntentKey::new(key);
            if let IntentPayload::Connectivity { constraints, .. } = &mut intent.payload {
                constraints.push(Constraint::Bandwidth { mbps: 600 });
            }
            intent
        };

        // both pick a path before either holds any bandwidth
        let (a, b) = (wide("a"), wide("b"));
        let stage_a = p.compile_stage(&a).unwrap();
        let stage_b = p.compile_stage(&b).unwrap();
        assert!(ledger.held_by(&a.key).is_empty());

        p.compile_frontier(&a, &stage_a).unwrap();
        assert_eq!(ledger.held_by(&a.key).len(), 2);
        let err = p.compile_frontier(&b, &stage_b).unwrap_err();
        assert!(matches!(err, CompileError::ResourceConflict { .. }));
        assert!(p.compile(&b).is_err());

        p.release(&a.key);
        p.compile(&b).unwrap();
        assert_eq!(ledger.held_by(&b.key).len(), 2);
    }

    #[test]
    fn unbounded_recursion_fails_at_depth_bound() {
        let err = pipeline().with_max_depth(4).compile(&custom("deepening")).unwrap_err();
        assert!(matches!(err, CompileError::DepthExceeded { max_depth: 4, .. }));
    }

    #[test]
    fn self_derivation_is_a_cycle() {
        let err = pipeline().compile(&custom("looping")).unwrap_err();
        assert!(matches!(err, CompileError::Cycle { .. }));
    }

    #[test]
    fn uninstall_plan_of_never_installed_intent_is_empty() {
        let data = IntentData::submitted(connectivity());
        assert!(pipeline().uninstall_plan(&data).unwrap().is_empty());
    }

    #[test]
    fn uninstall_plan_removes_installed_rules() {
        let rules = vec![FlowRule::new("s1", 1), FlowRule::new("s2", 1)];
        let data = IntentData::submitted(connectivity())
            .next(IntentState::Installing)
            .unwrap()
            .next(IntentState::Installed)
            .unwrap()
            .with_installed(Some(rules.clone()));

        let plan = pipeline().uninstall_plan(&data).unwrap();
        assert_eq!(Installable::rules_of(&plan), Some(rules));
    }

    #[test]
    fn uninstall_plan_fails_for_vanished_device() {
        let data = IntentData::submitted(connectivity()).with_installed(Some(vec![FlowRule::new("s9", 1)]));
        assert!(pipeline().uninstall_plan(&data).is_err());
    }
}
