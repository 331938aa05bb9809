//! Testing utilities for the intent engine workspace
//!
//! Shared fixtures, a recording listener, and polling helpers over an
//! in-process cluster.

#![allow(missing_docs)]

use intent_compiler::{CompilerRegistry, StaticTopology};
use intent_engine::{EngineConfig, LocalCluster, RetryConfig};
use intent_installer::InMemoryFabric;
use intent_model::{
    AppId, ConnectPoint, Constraint, FlowRule, Intent, IntentData, IntentKey, IntentPayload, IntentState,
};
use intent_store::{IntentEvent, IntentListener, IntentStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_APP: &str = "org.example.test";

/// Default wait for anything asynchronous in tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Chain `s1 - s2 - s3 - s4`
pub fn test_topology() -> StaticTopology {
    StaticTopology::linear(4, 1_000)
}

/// Connect host port 10 on `src` to host port 10 on `dst`
pub fn connectivity_intent(key: &str, src: &str, dst: &str) -> Intent {
    Intent::new(
        IntentKey::new(key),
        AppId::new(TEST_APP),
        IntentPayload::connectivity(ConnectPoint::new(src, 10), ConnectPoint::new(dst, 10)),
    )
}

/// Connectivity that needs `mbps` on every link of its path
pub fn bandwidth_intent(key: &str, src: &str, dst: &str, mbps: u64) -> Intent {
    let mut intent = connectivity_intent(key, src, dst);
    if let IntentPayload::Connectivity { constraints, .. } = &mut intent.payload {
        constraints.push(Constraint::Bandwidth { mbps });
    }
    intent
}

/// Isolate the listed devices from each other
pub fn isolation_intent(key: &str, group: &[&str]) -> Intent {
    Intent::new(
        IntentKey::new(key),
        AppId::new(TEST_APP),
        IntentPayload::isolation(group.iter().copied()),
    )
}

/// Already-primitive intent with one rule per device
pub fn objective_intent(key: &str, devices: &[&str]) -> Intent {
    let rules = devices
        .iter()
        .map(|d| FlowRule::new(*d, 50).matching("tag", key).then("output:1"))
        .collect();
    Intent::new(IntentKey::new(key), AppId::new(TEST_APP), IntentPayload::FlowObjective { rules })
}

/// Configuration with few partitions and fast retries
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_partitions(4)
        .with_workers(4)
        .with_install_timeout(Duration::from_millis(500))
        .with_retry(RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            multiplier: 2.0,
        })
}

/// Start a cluster over [`test_topology`] with the built-in compilers
///
/// # Panics
/// If the cluster fails to start
pub async fn start_cluster(replicas: usize, fabric: &InMemoryFabric) -> LocalCluster {
    start_cluster_with(replicas, fabric, CompilerRegistry::with_builtins(), None).await
}

/// Start a cluster with a custom registry and an optional listener
///
/// # Panics
/// If the cluster fails to start
pub async fn start_cluster_with(
    replicas: usize,
    fabric: &InMemoryFabric,
    registry: CompilerRegistry,
    listener: Option<Arc<dyn IntentListener>>,
) -> LocalCluster {
    let mut builder = LocalCluster::builder()
        .with_replicas(replicas)
        .with_config(test_config())
        .with_registry(registry)
        .with_topology(test_topology())
        .with_fabric(fabric.clone());
    if let Some(listener) = listener {
        builder = builder.with_listener(listener);
    }
    builder.start().await.unwrap()
}

/// Poll until `key` reaches `state`
///
/// # Panics
/// If the state is not reached within [`WAIT`]
pub async fn wait_for_state(store: &dyn IntentStore, key: &IntentKey, state: IntentState) -> IntentData {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(data) = store.get(key).await {
                if data.state() == state {
                    return data;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    match found {
        Ok(data) => data,
        Err(_) => panic!("{key} never reached {state}; now {:?}", store.get(key).await.map(|d| d.state())),
    }
}

/// Poll until the cluster has no outstanding work
///
/// # Panics
/// If the cluster does not converge within [`WAIT`]
pub async fn wait_converged(cluster: &LocalCluster) {
    assert!(cluster.wait_converged(WAIT).await, "cluster did not converge");
}

/// Listener keeping every event it sees
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<IntentEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events, in delivery order
    pub fn events(&self) -> Vec<IntentEvent> {
        self.events.lock().clone()
    }

    /// `(version, state)` sequence observed for `key`
    pub fn history(&self, key: &IntentKey) -> Vec<(u64, IntentState)> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| (e.version, e.new_state))
            .collect()
    }

    /// Wait until `key` has been seen in `state`
    ///
    /// # Panics
    /// If the event does not arrive within [`WAIT`]
    pub async fn wait_for(&self, key: &IntentKey, state: IntentState) {
        let seen = tokio::time::timeout(WAIT, async {
            while !self.history(key).iter().any(|(_, s)| *s == state) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(seen.is_ok(), "listener never saw {key} in {state}");
    }
}

impl IntentListener for RecordingListener {
    fn on_intent_state_changed(&self, event: &IntentEvent) {
        self.events.lock().push(event.clone());
    }
}
