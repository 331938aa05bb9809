//! In-process controller cluster
//!
//! Several replicas sharing one store, one simulated fabric and one
//! leadership service. Used by the simulator and by integration tests.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::replica::{Collaborators, Replica};
use crate::service::IntentService;
use crate::stats::StatsSnapshot;
use intent_compiler::{BandwidthLedger, CompilerRegistry, StaticTopology};
use intent_installer::InMemoryFabric;
use intent_model::IntentState;
use intent_partition::{LocalLeadershipService, LocalPartitionAdmin};
use intent_store::{InMemoryIntentStore, IntentListener, IntentStore};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`LocalCluster`]
pub struct ClusterBuilder {
    replicas: usize,
    config: EngineConfig,
    registry: CompilerRegistry,
    topology: StaticTopology,
    fabric: InMemoryFabric,
    listeners: Vec<Arc<dyn IntentListener>>,
    admin_latency: Duration,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            replicas: 3,
            config: EngineConfig::default(),
            registry: CompilerRegistry::with_builtins(),
            topology: StaticTopology::linear(4, 1_000),
            fabric: InMemoryFabric::new(),
            listeners: Vec::new(),
            admin_latency: Duration::ZERO,
        }
    }
}

impl ClusterBuilder {
    /// With replica count
    #[inline]
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// With base configuration; node ids are assigned per replica
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With compiler registry
    #[inline]
    #[must_use]
    pub fn with_registry(mut self, registry: CompilerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// With topology snapshot
    #[inline]
    #[must_use]
    pub fn with_topology(mut self, topology: StaticTopology) -> Self {
        self.topology = topology;
        self
    }

    /// With a pre-configured fabric
    #[inline]
    #[must_use]
    pub fn with_fabric(mut self, fabric: InMemoryFabric) -> Self {
        self.fabric = fabric;
        self
    }

    /// Add a store listener
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn IntentListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// With latency on partition membership changes
    #[inline]
    #[must_use]
    pub fn with_admin_latency(mut self, latency: Duration) -> Self {
        self.admin_latency = latency;
        self
    }

    /// Start every replica
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns the first replica start-up error
    pub async fn start(self) -> Result<LocalCluster, EngineError> {
        self.config.validate()?;
        let store = Arc::new(InMemoryIntentStore::with_listeners(
            self.config.change_buffer,
            self.listeners,
        ));
        let mut cluster = LocalCluster {
            store,
            fabric: self.fabric,
            leadership: Arc::new(LocalLeadershipService::new()),
            admin: Arc::new(LocalPartitionAdmin::new().with_latency(self.admin_latency)),
            registry: Arc::new(self.registry),
            topology: Arc::new(self.topology),
            ledger: Arc::new(BandwidthLedger::new()),
            config: self.config,
            replicas: Vec::new(),
            started: 0,
        };
        for _ in 0..self.replicas {
            cluster.add_replica().await?;
        }
        Ok(cluster)
    }
}

/// Running in-process cluster
pub struct LocalCluster {
    store: Arc<InMemoryIntentStore>,
    fabric: InMemoryFabric,
    leadership: Arc<LocalLeadershipService>,
    admin: Arc<LocalPartitionAdmin>,
    registry: Arc<CompilerRegistry>,
    topology: Arc<StaticTopology>,
    ledger: Arc<BandwidthLedger>,
    config: EngineConfig,
    replicas: Vec<Replica>,
    started: usize,
}

impl LocalCluster {
    /// Start building a cluster
    #[inline]
    #[must_use]
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::default()
    }

    /// Start one more replica, named `node-<n>`
    ///
    /// # Errors
    /// Returns the replica start-up error
    pub async fn add_replica(&mut self) -> Result<&Replica, EngineError> {
        self.started += 1;
        let config = self.config.clone().with_node_id(format!("node-{}", self.started));
        let deps = Collaborators {
            store: Arc::clone(&self.store) as Arc<dyn IntentStore>,
            leadership: Arc::clone(&self.leadership) as _,
            admin: Arc::clone(&self.admin) as _,
            registry: Arc::clone(&self.registry),
            topology: Arc::clone(&self.topology) as _,
            ledger: Arc::clone(&self.ledger),
            programmer: Arc::new(self.fabric.clone()),
        };
        let replica = Replica::start(config, deps).await?;
        self.replicas.push(replica);
        Ok(&self.replicas[self.replicas.len() - 1])
    }

    /// Gracefully stop the replica at `index`
    ///
    /// Its partitions fail over to the remaining replicas.
    ///
    /// # Errors
    /// Returns the replica's leave error
    pub async fn stop_replica(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.replicas.len() {
            return Ok(());
        }
        self.replicas.remove(index).shutdown().await
    }

    /// Shared store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<InMemoryIntentStore> {
        &self.store
    }

    /// Simulated fabric
    #[inline]
    #[must_use]
    pub fn fabric(&self) -> &InMemoryFabric {
        &self.fabric
    }

    /// Bandwidth held per intent across all replicas
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &BandwidthLedger {
        &self.ledger
    }

    /// Leadership service, for forcing stale views
    #[inline]
    #[must_use]
    pub fn leadership(&self) -> &Arc<LocalLeadershipService> {
        &self.leadership
    }

    /// Running replicas
    #[inline]
    #[must_use]
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Client API
    #[must_use]
    pub fn service(&self) -> IntentService {
        IntentService::new(Arc::clone(&self.store) as Arc<dyn IntentStore>)
    }

    /// Sum of every running replica's counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.replicas
            .iter()
            .map(Replica::stats)
            .fold(StatsSnapshot::default(), StatsSnapshot::merged)
    }

    /// Whether every key rests in a stable state with no request waiting
    pub async fn is_converged(&self) -> bool {
        for key in self.store.keys().await {
            if self.store.pending(&key).await.is_some() {
                return false;
            }
            match self.store.get(&key).await {
                Some(data) if data.state().is_stable() => {}
                _ => return false,
            }
        }
        true
    }

    /// Poll until converged or `timeout` elapses
    pub async fn wait_converged(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_converged().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Number of records per state
    pub async fn state_counts(&self) -> Vec<(IntentState, usize)> {
        let mut counts = Vec::new();
        for state in IntentState::ALL {
            let n = self.store.intents_in_state(state).await.len();
            if n > 0 {
                counts.push((state, n));
            }
        }
        counts
    }

    /// Stop every replica
    ///
    /// # Errors
    /// Returns the first leave error
    pub async fn shutdown(mut self) -> Result<(), EngineError> {
        let mut first_error = None;
        while let Some(replica) = self.replicas.pop() {
            if let Err(e) = replica.shutdown().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("replicas", &self.replicas)
            .field("fabric_rules", &self.fabric.rule_count())
            .finish_non_exhaustive()
    }
}
