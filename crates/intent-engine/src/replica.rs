//! Replica worker pool
//!
//! One [`Replica`] per controller node. It listens to the store's change
//! stream and to its own ownership changes, and drives every owned key
//! through the phase state machine. A key is handled by at most one local
//! worker at a time; a notification that arrives while the key is being
//! processed marks it dirty and earns exactly one more pass. Concurrency
//! across keys is bounded by a semaphore.
//!
//! Each pass runs in its own task. A pass that panics is counted and ends
//! like an idle one, so the next notification or rescan schedules the key
//! again.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::phase::{Phase, PhaseContext, PhaseResult};
use crate::retry::RetryPolicy;
use crate::service::IntentService;
use crate::stats::{EngineStats, StatsSnapshot};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use intent_compiler::{BandwidthLedger, CompilerPipeline, CompilerRegistry, TopologyView};
use intent_installer::{DeviceProgrammer, Installer};
use intent_model::{validate_transition, IntentData, IntentKey, NodeId};
use intent_partition::{
    LeadershipService, OwnershipChange, PartitionAdmin, PartitionId, WorkGuard, WorkPartitioner,
};
use intent_store::{IntentStore, StoreEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

/// External services a replica runs against
#[derive(Clone)]
pub struct Collaborators {
    /// Shared intent records
    pub store: Arc<dyn IntentStore>,
    /// Partition leader election
    pub leadership: Arc<dyn LeadershipService>,
    /// Joins and leaves partitions
    pub admin: Arc<dyn PartitionAdmin>,
    /// Compilers by intent kind
    pub registry: Arc<CompilerRegistry>,
    /// Devices, links and capacities
    pub topology: Arc<dyn TopologyView>,
    /// Bandwidth held per intent, shared by every replica
    pub ledger: Arc<BandwidthLedger>,
    /// Device access
    pub programmer: Arc<dyn DeviceProgrammer>,
}

/// Result of one processing pass over a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A record was written; another pass may follow
    Progress,
    /// Nothing to do
    Idle,
    /// Another writer won the CAS; wait for its notification
    Conflict,
    /// Ownership lost mid-pass; nothing written
    Abandoned,
    /// Key's partition is not owned here
    NotOwned,
}

struct Worker {
    store: Arc<dyn IntentStore>,
    partitioner: WorkPartitioner,
    pipeline: CompilerPipeline,
    installer: Installer,
    retry: RetryPolicy,
    stats: EngineStats,
    /// Keys with a live worker; `true` means re-run once it finishes
    scheduled: DashMap<IntentKey, bool>,
    permits: Arc<Semaphore>,
}

impl Worker {
    fn schedule(self: &Arc<Self>, key: IntentKey) {
        if !self.partitioner.owns(&key) {
            return;
        }
        match self.scheduled.entry(key.clone()) {
            Entry::Occupied(mut dirty) => {
                *dirty.get_mut() = true;
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
            }
        }
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.drive(key).await });
    }

    async fn drive(self: Arc<Self>, key: IntentKey) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                self.scheduled.remove(&key);
                return;
            };
            let pass = {
                let worker = Arc::clone(&self);
                let key = key.clone();
                tokio::spawn(async move { worker.process(&key).await })
            };
            let outcome = match pass.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    if error.is_panic() {
                        self.stats.panicked();
                    }
                    tracing::error!(%key, %error, "processing task died");
                    PassOutcome::Idle
                }
            };
            drop(permit);
            tracing::trace!(%key, ?outcome, "pass finished");

            let again = match self.scheduled.entry(key.clone()) {
                Entry::Occupied(mut dirty) if *dirty.get() => {
                    *dirty.get_mut() = false;
                    true
                }
                Entry::Occupied(slot) => {
                    slot.remove();
                    false
                }
                Entry::Vacant(_) => false,
            };
            if !again {
                return;
            }
        }
    }

    /// Advance `key` until it rests, conflicts, or leaves this replica
    async fn process(&self, key: &IntentKey) -> PassOutcome {
        loop {
            let outcome = match self.pass(key).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(%key, %error, "processing pass failed");
                    PassOutcome::Idle
                }
            };
            if outcome != PassOutcome::Progress {
                return outcome;
            }
        }
    }

    async fn pass(&self, key: &IntentKey) -> Result<PassOutcome, EngineError> {
        let Some(guard) = self.partitioner.begin(key) else {
            return Ok(PassOutcome::NotOwned);
        };
        match self.store.get(key).await {
            Some(data) if data.state().needs_processing() => self.advance(data, &guard).await,
            current => self.promote_pending(key, current.as_ref(), &guard).await,
        }
    }

    /// Promote the waiting request over a stable (or absent) record
    async fn promote_pending(
        &self,
        key: &IntentKey,
        current: Option<&IntentData>,
        guard: &WorkGuard,
    ) -> Result<PassOutcome, EngineError> {
        let Some(request) = self.store.pending(key).await else {
            return Ok(PassOutcome::Idle);
        };

        let next = match IntentData::promote(current, &request) {
            Ok(next) => next,
            Err(error) => {
                tracing::warn!(%key, %error, "discarding inapplicable request");
                if self.store.discard_pending(key, &request).await {
                    self.stats.rejected_request();
                }
                return Ok(PassOutcome::Idle);
            }
        };

        if !guard.still_owns() {
            self.stats.abandoned();
            return Ok(PassOutcome::Abandoned);
        }

        let expected = current.map(IntentData::version);
        let (state, version) = (next.state(), next.version());
        if self.store.promote(key, expected, next, &request).await? {
            self.stats.promotion();
            tracing::info!(%key, %state, version, operator = request.operator_override, "request promoted");
            Ok(PassOutcome::Progress)
        } else {
            self.stats.cas_conflict();
            tracing::debug!(%key, ?expected, "promotion lost CAS race");
            Ok(PassOutcome::Conflict)
        }
    }

    async fn advance(&self, data: IntentData, guard: &WorkGuard) -> Result<PassOutcome, EngineError> {
        let key = data.key().clone();
        let (from, expected) = (data.state(), data.version());
        let ctx = PhaseContext {
            pipeline: &self.pipeline,
            installer: &self.installer,
            retry: &self.retry,
            ownership: guard,
            stats: &self.stats,
        };

        let next = match Phase::from_data(data).advance(&ctx).await? {
            PhaseResult::Next(next) => next,
            PhaseResult::Quiescent => return Ok(PassOutcome::Idle),
            PhaseResult::Abandoned => {
                self.stats.abandoned();
                tracing::debug!(%key, state = %from, "pass abandoned after ownership loss");
                return Ok(PassOutcome::Abandoned);
            }
        };

        validate_transition(from, next.state())?;
        if !guard.still_owns() {
            self.stats.abandoned();
            tracing::debug!(%key, state = %from, "ownership lost before write");
            return Ok(PassOutcome::Abandoned);
        }

        let (to, version) = (next.state(), next.version());
        if self.store.write(&key, Some(expected), next).await? {
            self.stats.transition();
            tracing::info!(%key, %from, %to, version, "intent transitioned");
            Ok(PassOutcome::Progress)
        } else {
            self.stats.cas_conflict();
            tracing::debug!(%key, expected, "write lost CAS race");
            Ok(PassOutcome::Conflict)
        }
    }

    async fn rescan(self: &Arc<Self>, partition: Option<PartitionId>) {
        for key in self.store.keys().await {
            if partition.map_or(true, |p| self.partitioner.partition_of(&key) == p) {
                self.schedule(key);
            }
        }
    }
}

async fn follow_changes(
    worker: Arc<Worker>,
    mut changes: broadcast::Receiver<StoreEvent>,
    mut ownership: broadcast::Receiver<OwnershipChange>,
) {
    let node = worker.partitioner.node().clone();
    loop {
        tokio::select! {
            event = changes.recv() => match event {
                Ok(event) => worker.schedule(event.key().clone()),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(%node, missed, "store changes lagged, rescanning");
                    worker.rescan(None).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            change = ownership.recv() => match change {
                Ok(OwnershipChange { partition, owned: true }) => worker.rescan(Some(partition)).await,
                Ok(OwnershipChange { owned: false, .. }) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => worker.rescan(None).await,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!(%node, "change stream closed");
}

/// A running controller replica
pub struct Replica {
    worker: Arc<Worker>,
    tasks: Vec<JoinHandle<()>>,
}

impl Replica {
    /// Validate configuration, join every partition and start processing
    ///
    /// # Errors
    /// - [`EngineError::Config`] for invalid configuration
    /// - [`EngineError::Compile`] if a required kind has no compiler
    /// - [`EngineError::Partition`] if joining fails
    pub async fn start(config: EngineConfig, deps: Collaborators) -> Result<Self, EngineError> {
        config.validate()?;
        deps.registry.ensure_registered(&config.required_kinds)?;

        let partitioner = WorkPartitioner::new(
            config.node_id.clone(),
            config.partitions,
            Arc::clone(&deps.leadership),
            Arc::clone(&deps.admin),
        );
        let worker = Arc::new(Worker {
            store: Arc::clone(&deps.store),
            partitioner: partitioner.clone(),
            pipeline: CompilerPipeline::new(deps.registry, deps.topology)
                .with_ledger(deps.ledger)
                .with_max_depth(config.max_compile_depth),
            installer: Installer::new(deps.programmer).with_timeout(config.install_timeout()),
            retry: RetryPolicy::from(&config.retry),
            stats: EngineStats::default(),
            scheduled: DashMap::new(),
            permits: Arc::new(Semaphore::new(config.workers)),
        });

        let changes = deps.store.subscribe();
        let ownership = partitioner.on_ownership_changed();
        let tracker = partitioner.spawn_tracker();
        let follower = tokio::spawn(follow_changes(Arc::clone(&worker), changes, ownership));
        let replica = Self {
            worker,
            tasks: vec![tracker, follower],
        };

        partitioner.join_all().await?;
        replica.worker.rescan(None).await;
        tracing::info!(
            node = %config.node_id,
            owned = partitioner.owned_partitions().len(),
            partitions = config.partitions,
            "replica started"
        );
        Ok(replica)
    }

    /// This replica's node id
    #[inline]
    #[must_use]
    pub fn node(&self) -> &NodeId {
        self.worker.partitioner.node()
    }

    /// Ownership view of this replica
    #[inline]
    #[must_use]
    pub fn partitioner(&self) -> &WorkPartitioner {
        &self.worker.partitioner
    }

    /// Client API over the shared store
    #[must_use]
    pub fn service(&self) -> IntentService {
        IntentService::new(Arc::clone(&self.worker.store))
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.worker.stats.snapshot()
    }

    /// Run one pass over `key` now
    ///
    /// Bypasses scheduling; used by operators and tests to force progress.
    pub async fn process(&self, key: &IntentKey) -> PassOutcome {
        self.worker.process(key).await
    }

    /// Re-examine every known key
    pub async fn rescan(&self) {
        self.worker.rescan(None).await;
    }

    /// Leave every partition (draining in-flight work) and stop
    ///
    /// # Errors
    /// Returns the first partition leave error; the replica stops regardless
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let result = self.worker.partitioner.leave_all().await;
        tracing::info!(node = %self.node(), ok = result.is_ok(), "replica stopped");
        drop(self);
        result.map_err(EngineError::from)
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("partitioner", &self.worker.partitioner)
            .field("stats", &self.worker.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_compiler::{CompileError, IntentCompiler, StaticTopology};
    use intent_installer::InMemoryFabric;
    use intent_model::{AppId, FlowRule, Installable, Intent, IntentKind, IntentPayload, IntentState};
    use intent_partition::{LocalLeadershipService, LocalPartitionAdmin};
    use intent_store::InMemoryIntentStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Panics the first time it is asked to compile
    #[derive(Default)]
    struct Brittle {
        tripped: AtomicBool,
    }

    impl IntentCompiler for Brittle {
        fn kind(&self) -> IntentKind {
            IntentKind::new("brittle")
        }

        fn compile(&self, _intent: &Intent, _topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
            assert!(self.tripped.swap(true, Ordering::SeqCst), "compiler blew up");
            Ok(vec![FlowRule::new("s2", 5).then("drop").into()])
        }
    }

    fn deps(store: &Arc<InMemoryIntentStore>, fabric: &InMemoryFabric) -> Collaborators {
        Collaborators {
            store: Arc::clone(store) as Arc<dyn IntentStore>,
            leadership: Arc::new(LocalLeadershipService::new()),
            admin: Arc::new(LocalPartitionAdmin::new()),
            registry: Arc::new(CompilerRegistry::with_builtins()),
            topology: Arc::new(StaticTopology::linear(3, 1000)),
            ledger: Arc::new(BandwidthLedger::new()),
            programmer: Arc::new(fabric.clone()),
        }
    }

    fn objective(key: &str) -> Intent {
        Intent::new(
            IntentKey::new(key),
            AppId::new("app"),
            IntentPayload::FlowObjective {
                rules: vec![FlowRule::new("s1", 1).then("output:2")],
            },
        )
    }

    async fn wait_for(store: &InMemoryIntentStore, key: &IntentKey, state: IntentState) -> IntentData {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(data) = store.get(key).await {
                    if data.state() == state {
                        return data;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn missing_required_kind_refuses_to_start() {
        let store = Arc::new(InMemoryIntentStore::default());
        let mut deps = deps(&store, &InMemoryFabric::new());
        deps.registry = Arc::new(CompilerRegistry::new());
        let config = EngineConfig::default().with_required_kinds([IntentKind::CONNECTIVITY]);

        let err = Replica::start(config, deps).await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn single_replica_installs_and_withdraws() {
        let store = Arc::new(InMemoryIntentStore::default());
        let fabric = InMemoryFabric::new();
        let replica = Replica::start(EngineConfig::default().with_partitions(4), deps(&store, &fabric))
            .await
            .unwrap();
        let service = replica.service();
        let key = service.submit(objective("k")).await.unwrap();

        let installed = wait_for(&store, &key, IntentState::Installed).await;
        assert_eq!(installed.version(), 2);
        assert_eq!(fabric.rule_count(), 1);

        service.withdraw(&key).await.unwrap();
        let withdrawn = wait_for(&store, &key, IntentState::Withdrawn).await;
        assert_eq!(withdrawn.version(), 5);
        assert_eq!(fabric.rule_count(), 0);

        let stats = replica.stats();
        assert_eq!(stats.promotions, 2);
        assert_eq!(stats.transitions, 4);
        replica.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn withdraw_of_withdrawn_intent_is_discarded() {
        let store = Arc::new(InMemoryIntentStore::default());
        let fabric = InMemoryFabric::new();
        let replica = Replica::start(EngineConfig::default().with_partitions(2), deps(&store, &fabric))
            .await
            .unwrap();
        let service = replica.service();
        let key = service.submit(objective("k")).await.unwrap();
        wait_for(&store, &key, IntentState::Installed).await;
        service.withdraw(&key).await.unwrap();
        let withdrawn = wait_for(&store, &key, IntentState::Withdrawn).await;

        service.withdraw(&key).await.unwrap();
        assert_eq!(replica.process(&key).await, PassOutcome::Idle);
        assert_eq!(store.get(&key).await.unwrap().version(), withdrawn.version());
        assert_eq!(store.pending(&key).await, None);
        assert_eq!(replica.stats().rejected_requests, 1);
    }

    #[tokio::test]
    async fn panicking_pass_does_not_strand_the_key() {
        let store = Arc::new(InMemoryIntentStore::default());
        let fabric = InMemoryFabric::new();
        let mut deps = deps(&store, &fabric);
        let mut registry = CompilerRegistry::with_builtins();
        registry.register(Arc::new(Brittle::default())).unwrap();
        deps.registry = Arc::new(registry);
        let replica = Replica::start(EngineConfig::default().with_partitions(2), deps)
            .await
            .unwrap();

        let intent = Intent::new(
            IntentKey::new("fragile"),
            AppId::new("app"),
            IntentPayload::Custom {
                kind: "brittle".into(),
                params: BTreeMap::new(),
            },
        );
        let key = replica.service().submit(intent).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while replica.stats().panics == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        replica.rescan().await;
        let installed = wait_for(&store, &key, IntentState::Installed).await;
        assert_eq!(installed.installed().map(<[FlowRule]>::len), Some(1));
        assert_eq!(replica.stats().panics, 1);
        assert_eq!(fabric.rule_count(), 1);
        replica.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_ownership() {
        let store = Arc::new(InMemoryIntentStore::default());
        let replica = Replica::start(
            EngineConfig::default().with_partitions(3),
            deps(&store, &InMemoryFabric::new()),
        )
        .await
        .unwrap();
        let partitioner = replica.partitioner().clone();
        assert_eq!(partitioner.owned_partitions().len(), 3);

        replica.shutdown().await.unwrap();
        assert!(partitioner.owned_partitions().is_empty());
    }
}
