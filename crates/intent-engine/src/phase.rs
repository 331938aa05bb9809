//! Phase state machine
//!
//! A [`Phase`] is derived from a persisted [`IntentData`] snapshot and is
//! never stored. Advancing it runs the side effects of exactly one lifecycle
//! step (a compile stage or a device batch) and yields the record to write
//! next. Nothing here touches the store: the caller owns the CAS write, so an
//! abandoned phase leaves no durable trace.
//!
//! Failure classes:
//!
//! - compile failures never touch devices, so they always end in FAILED
//! - device failures end in FAILED only if nothing was previously installed,
//!   otherwise CORRUPT
//! - every withdrawal failure ends in CORRUPT

use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::stats::EngineStats;
use intent_compiler::CompilerPipeline;
use intent_installer::{removal_ops, transition_ops, BatchOutcome, Installer};
use intent_model::{FlowOp, Installable, IntentData, IntentKey, IntentState};
use intent_partition::WorkGuard;

/// Right to keep producing side effects for a key
pub trait Ownership: Send + Sync {
    /// Whether the caller may still act on the key
    fn still_owns(&self) -> bool;
}

impl Ownership for WorkGuard {
    fn still_owns(&self) -> bool {
        WorkGuard::still_owns(self)
    }
}

/// Collaborators a phase needs to advance
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    /// Compiles intents and holds their bandwidth
    pub pipeline: &'a CompilerPipeline,
    /// Pushes flow-rule batches to devices
    pub installer: &'a Installer,
    /// Backoff for transient device errors
    pub retry: &'a RetryPolicy,
    /// Checked before every device batch
    pub ownership: &'a dyn Ownership,
    /// Counters for retries
    pub stats: &'a EngineStats,
}

/// Work to do next for one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Compile the first stage
    InstallRequest(IntentData),
    /// Finish compiling derived intents
    Compiling(IntentData),
    /// Push the compiled rules to the devices
    Installing(IntentData),
    /// Plan the removal of installed rules
    WithdrawRequest(IntentData),
    /// Remove the planned rules from the devices
    Withdrawing(IntentData),
    /// Nothing to do until a new request is promoted
    Final(IntentState),
}

/// Result of advancing a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseResult {
    /// Record to CAS-write next
    Next(IntentData),
    /// Stable state; no write
    Quiescent,
    /// Ownership lost mid-phase; no write
    Abandoned,
}

/// How a device batch ended after retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchResult {
    Applied,
    Failed { attempts: u32 },
    Abandoned,
}

impl Phase {
    /// Phase for a snapshot
    #[must_use]
    pub fn from_data(data: IntentData) -> Self {
        match data.state() {
            IntentState::InstallReq => Self::InstallRequest(data),
            IntentState::Compiling => Self::Compiling(data),
            IntentState::Installing => Self::Installing(data),
            IntentState::WithdrawReq => Self::WithdrawRequest(data),
            IntentState::Withdrawing => Self::Withdrawing(data),
            state @ (IntentState::Installed
            | IntentState::Withdrawn
            | IntentState::Failed
            | IntentState::Corrupt) => Self::Final(state),
        }
    }

    /// Whether advancing this phase has work to do
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// Run this phase's side effects and compute the next record
    ///
    /// Re-running it on the same snapshot re-submits the same idempotent
    /// batch, so devices end in the same state.
    ///
    /// # Errors
    /// Returns [`EngineError::Model`] if a computed successor breaks the
    /// transition table
    pub async fn advance(self, ctx: &PhaseContext<'_>) -> Result<PhaseResult, EngineError> {
        let next = match self {
            Self::Final(_) => return Ok(PhaseResult::Quiescent),
            Self::InstallRequest(data) => install_request(ctx, &data)?,
            Self::Compiling(data) => compiling(ctx, &data)?,
            Self::Installing(data) => match installing(ctx, &data).await? {
                Some(next) => next,
                None => return Ok(PhaseResult::Abandoned),
            },
            Self::WithdrawRequest(data) => withdraw_request(ctx, &data)?,
            Self::Withdrawing(data) => match withdrawing(ctx, &data).await? {
                Some(next) => next,
                None => return Ok(PhaseResult::Abandoned),
            },
        };
        Ok(PhaseResult::Next(next))
    }
}

fn install_request(ctx: &PhaseContext<'_>, data: &IntentData) -> Result<IntentData, EngineError> {
    match ctx.pipeline.compile_stage(data.intent()) {
        Ok(out) if out.iter().all(Installable::is_installer_ready) => {
            Ok(data.next(IntentState::Installing)?.with_compiled(out))
        }
        Ok(out) => Ok(data.next(IntentState::Compiling)?.with_compiled(out)),
        Err(error) => {
            tracing::warn!(key = %data.key(), %error, "compilation failed");
            release_unless_installed(ctx, data);
            Ok(data.next(IntentState::Failed)?.with_compiled(Vec::new()).with_errors(1))
        }
    }
}

fn compiling(ctx: &PhaseContext<'_>, data: &IntentData) -> Result<IntentData, EngineError> {
    match ctx.pipeline.compile_frontier(data.intent(), data.compiled()) {
        Ok(out) => Ok(data.next(IntentState::Installing)?.with_compiled(out)),
        Err(error) => {
            tracing::warn!(key = %data.key(), %error, "compilation failed");
            release_unless_installed(ctx, data);
            Ok(data.next(IntentState::Failed)?.with_compiled(Vec::new()).with_errors(1))
        }
    }
}

async fn installing(ctx: &PhaseContext<'_>, data: &IntentData) -> Result<Option<IntentData>, EngineError> {
    let Some(rules) = Installable::rules_of(data.compiled()) else {
        tracing::warn!(key = %data.key(), "installing a record that is not fully compiled");
        return Ok(Some(data.next(IntentState::Failed)?.with_errors(1)));
    };

    let ops = transition_ops(data.installed(), &rules);
    match apply_with_retry(ctx, data.key(), ops).await {
        BatchResult::Applied => Ok(Some(
            data.next(IntentState::Installed)?.with_installed(Some(rules)),
        )),
        BatchResult::Failed { attempts } if data.has_prior_install() => {
            tracing::error!(key = %data.key(), attempts, "re-install failed over existing rules");
            Ok(Some(data.next(IntentState::Corrupt)?.with_errors(attempts)))
        }
        BatchResult::Failed { attempts } => {
            tracing::warn!(key = %data.key(), attempts, "install failed");
            ctx.pipeline.release(data.key());
            Ok(Some(data.next(IntentState::Failed)?.with_errors(attempts)))
        }
        BatchResult::Abandoned => Ok(None),
    }
}

fn withdraw_request(ctx: &PhaseContext<'_>, data: &IntentData) -> Result<IntentData, EngineError> {
    match ctx.pipeline.uninstall_plan(data) {
        Ok(plan) => Ok(data.next(IntentState::Withdrawing)?.with_compiled(plan)),
        Err(error) => {
            tracing::error!(key = %data.key(), %error, "cannot plan withdrawal");
            Ok(data.next(IntentState::Corrupt)?.with_errors(1))
        }
    }
}

async fn withdrawing(ctx: &PhaseContext<'_>, data: &IntentData) -> Result<Option<IntentData>, EngineError> {
    let Some(rules) = Installable::rules_of(data.compiled()) else {
        tracing::error!(key = %data.key(), "removal plan holds unresolved intents");
        return Ok(Some(data.next(IntentState::Corrupt)?.with_errors(1)));
    };

    match apply_with_retry(ctx, data.key(), removal_ops(&rules)).await {
        BatchResult::Applied => {
            ctx.pipeline.release(data.key());
            Ok(Some(
                data.next(IntentState::Withdrawn)?
                    .with_compiled(Vec::new())
                    .with_installed(None),
            ))
        }
        BatchResult::Failed { attempts } => {
            tracing::error!(key = %data.key(), attempts, "withdrawal failed");
            Ok(Some(data.next(IntentState::Corrupt)?.with_errors(attempts)))
        }
        BatchResult::Abandoned => Ok(None),
    }
}

/// Bandwidth stays held while earlier rules are still on the devices
fn release_unless_installed(ctx: &PhaseContext<'_>, data: &IntentData) {
    if !data.has_prior_install() {
        ctx.pipeline.release(data.key());
    }
}

/// Submit `ops`, retrying unknown outcomes with backoff
///
/// Ownership is checked before every attempt. Definite refusals
/// (partial or total failure) are never retried.
async fn apply_with_retry(ctx: &PhaseContext<'_>, key: &IntentKey, ops: Vec<FlowOp>) -> BatchResult {
    let max_attempts = ctx.retry.max_attempts();
    let mut attempt = 0;
    loop {
        if !ctx.ownership.still_owns() {
            tracing::debug!(%key, attempt, "ownership lost before batch");
            return BatchResult::Abandoned;
        }

        match ctx.installer.apply(ops.clone()).await {
            Ok(BatchOutcome::Success) => return BatchResult::Applied,
            Ok(outcome) => {
                tracing::warn!(%key, ?outcome, "devices refused batch");
                return BatchResult::Failed { attempts: attempt + 1 };
            }
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                let delay = ctx.retry.delay(attempt);
                tracing::warn!(%key, %error, attempt, ?delay, "transient device error, retrying");
                ctx.stats.retry();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::warn!(%key, %error, attempts = attempt + 1, "giving up on batch");
                return BatchResult::Failed { attempts: attempt + 1 };
            }
        }
    }
}

impl std::fmt::Debug for PhaseContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("pipeline", self.pipeline)
            .field("installer", self.installer)
            .field("retry", self.retry)
            .field("owned", &self.ownership.still_owns())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use intent_compiler::{CompilerRegistry, StaticTopology};
    use intent_installer::{Fault, InMemoryFabric};
    use intent_model::{AppId, ConnectPoint, FlowRule, Intent, IntentPayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Flag(AtomicBool);

    impl Ownership for Flag {
        fn still_owns(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        pipeline: CompilerPipeline,
        installer: Installer,
        retry: RetryPolicy,
        owned: Flag,
        stats: EngineStats,
        fabric: InMemoryFabric,
    }

    impl Harness {
        fn new(registry: CompilerRegistry) -> Self {
            let fabric = InMemoryFabric::new();
            Self {
                pipeline: CompilerPipeline::new(Arc::new(registry), Arc::new(StaticTopology::linear(4, 1000))),
                installer: Installer::new(Arc::new(fabric.clone())).with_timeout(Duration::from_millis(200)),
                retry: RetryPolicy::from(&RetryConfig {
                    max_attempts: 3,
                    initial_backoff_ms: 10,
                    max_backoff_ms: 40,
                    multiplier: 2.0,
                }),
                owned: Flag(AtomicBool::new(true)),
                stats: EngineStats::default(),
                fabric,
            }
        }

        fn ctx(&self) -> PhaseContext<'_> {
            PhaseContext {
                pipeline: &self.pipeline,
                installer: &self.installer,
                retry: &self.retry,
                ownership: &self.owned,
                stats: &self.stats,
            }
        }

        async fn step(&self, data: &IntentData) -> IntentData {
            match Phase::from_data(data.clone()).advance(&self.ctx()).await.unwrap() {
                PhaseResult::Next(next) => next,
                other => panic!("expected a successor, got {other:?}"),
            }
        }

        async fn run_to_rest(&self, mut data: IntentData) -> Vec<IntentState> {
            let mut states = vec![data.state()];
            while data.state().needs_processing() {
                data = self.step(&data).await;
                states.push(data.state());
            }
            states
        }
    }

    fn connectivity(key: &str) -> Intent {
        Intent::new(
            IntentKey::new(key),
            AppId::new("app"),
            IntentPayload::connectivity(ConnectPoint::new("s1", 10), ConnectPoint::new("s3", 10)),
        )
    }

    fn objective(key: &str) -> Intent {
        Intent::new(
            IntentKey::new(key),
            AppId::new("app"),
            IntentPayload::FlowObjective {
                rules: vec![FlowRule::new("s1", 5).then("output:2"), FlowRule::new("s2", 5).then("output:2")],
            },
        )
    }

    async fn installed(h: &Harness, intent: Intent) -> IntentData {
        let mut data = IntentData::submitted(intent);
        while data.state() != IntentState::Installed {
            data = h.step(&data).await;
        }
        data
    }

    #[tokio::test]
    async fn connectivity_goes_through_compiling() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let states = h.run_to_rest(IntentData::submitted(connectivity("k"))).await;
        assert_eq!(
            states,
            vec![
                IntentState::InstallReq,
                IntentState::Compiling,
                IntentState::Installing,
                IntentState::Installed
            ]
        );
        assert_eq!(h.fabric.rule_count(), 3);
    }

    #[tokio::test]
    async fn primitive_intent_skips_compiling() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let states = h.run_to_rest(IntentData::submitted(objective("k"))).await;
        assert_eq!(
            states,
            vec![IntentState::InstallReq, IntentState::Installing, IntentState::Installed]
        );
    }

    #[tokio::test]
    async fn missing_compiler_fails_without_device_calls() {
        let h = Harness::new(CompilerRegistry::new());
        let data = h.step(&IntentData::submitted(connectivity("k"))).await;
        assert_eq!(data.state(), IntentState::Failed);
        assert_eq!(data.version(), 1);
        assert_eq!(data.error_count(), 1);
        assert_eq!(h.fabric.batch_count(), 0);
    }

    #[tokio::test]
    async fn first_install_failure_is_safe() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installing = h.step(&IntentData::submitted(objective("k"))).await;
        h.fabric.inject(Fault::TotalFailure);

        let data = h.step(&installing).await;
        assert_eq!(data.state(), IntentState::Failed);
        assert!(!data.has_prior_install());
    }

    #[tokio::test]
    async fn reinstall_failure_over_existing_rules_is_corrupt() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installed = installed(&h, objective("k")).await;

        let replacement = Intent::new(
            IntentKey::new("k"),
            AppId::new("app"),
            IntentPayload::FlowObjective {
                rules: vec![FlowRule::new("s3", 5).then("drop")],
            },
        );
        let request = intent_model::IntentRequest::install(replacement);
        let promoted = IntentData::promote(Some(&installed), &request).unwrap();
        let installing = h.step(&promoted).await;
        h.fabric.inject(Fault::PartialFailure);

        assert_eq!(h.step(&installing).await.state(), IntentState::Corrupt);
    }

    #[tokio::test]
    async fn withdrawal_partial_failure_is_corrupt() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installed = installed(&h, objective("k")).await;
        let request = intent_model::IntentRequest::withdraw(IntentKey::new("k"));
        let withdraw_req = IntentData::promote(Some(&installed), &request).unwrap();

        let withdrawing = h.step(&withdraw_req).await;
        assert_eq!(withdrawing.state(), IntentState::Withdrawing);
        assert_eq!(withdrawing.compiled().len(), 2);

        h.fabric.inject(Fault::PartialFailure);
        assert_eq!(h.step(&withdrawing).await.state(), IntentState::Corrupt);
    }

    #[tokio::test]
    async fn withdrawal_clears_devices() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installed = installed(&h, objective("k")).await;
        let request = intent_model::IntentRequest::withdraw(IntentKey::new("k"));
        let states = h.run_to_rest(IntentData::promote(Some(&installed), &request).unwrap()).await;

        assert_eq!(states.last(), Some(&IntentState::Withdrawn));
        assert_eq!(h.fabric.rule_count(), 0);
    }

    #[tokio::test]
    async fn rerunning_install_on_same_snapshot_changes_nothing() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installing = h.step(&IntentData::submitted(objective("k"))).await;

        let first = h.step(&installing).await;
        let changes = h.fabric.change_count();
        let second = h.step(&installing).await;

        assert_eq!(first.installed(), second.installed());
        assert_eq!(h.fabric.change_count(), changes);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_then_succeed() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installing = h.step(&IntentData::submitted(objective("k"))).await;
        h.fabric.inject(Fault::Unreachable);
        h.fabric.inject(Fault::DropCallback);

        let data = h.step(&installing).await;
        assert_eq!(data.state(), IntentState::Installed);
        assert_eq!(h.stats.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installing = h.step(&IntentData::submitted(objective("k"))).await;
        for _ in 0..3 {
            h.fabric.inject(Fault::Unreachable);
        }

        let data = h.step(&installing).await;
        assert_eq!(data.state(), IntentState::Failed);
        assert_eq!(data.error_count(), 3);
        assert_eq!(h.fabric.batch_count(), 3);
    }

    #[tokio::test]
    async fn lost_ownership_abandons_without_device_calls() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installing = h.step(&IntentData::submitted(objective("k"))).await;
        h.owned.0.store(false, Ordering::SeqCst);

        let result = Phase::from_data(installing).advance(&h.ctx()).await.unwrap();
        assert_eq!(result, PhaseResult::Abandoned);
        assert_eq!(h.fabric.batch_count(), 0);
    }

    #[tokio::test]
    async fn stable_states_are_quiescent() {
        let h = Harness::new(CompilerRegistry::with_builtins());
        let installed = installed(&h, objective("k")).await;
        let phase = Phase::from_data(installed);
        assert!(phase.is_final());
        assert_eq!(phase.advance(&h.ctx()).await.unwrap(), PhaseResult::Quiescent);
    }
}
