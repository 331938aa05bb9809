//! Partition ownership across replicas
//!
//! - two replicas that both believe they own a key never write the same
//!   version twice
//! - work on a stopped replica's partitions is picked up by the survivors

use intent_compiler::CompilerRegistry;
use intent_engine::simulator::VersionAudit;
use intent_installer::InMemoryFabric;
use intent_model::IntentState;
use intent_test_utils::{
    connectivity_intent, objective_intent, start_cluster, start_cluster_with, wait_converged,
    wait_for_state, WAIT,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

/// Tenet: A stale leadership view costs at most a lost compare-and-set.
///
/// The second replica is told it leads the key's partition while the first
/// still does. Both drive the key, but every version reaches listeners
/// exactly once and the record still ends INSTALLED.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dual_ownership_never_writes_a_version_twice() {
    let fabric = InMemoryFabric::new();
    let audit = Arc::new(VersionAudit::default());
    let cluster = start_cluster_with(
        2,
        &fabric,
        CompilerRegistry::with_builtins(),
        Some(Arc::clone(&audit) as _),
    )
    .await;

    let intent = connectivity_intent("contested", "s1", "s4");
    let first = &cluster.replicas()[0];
    let second = &cluster.replicas()[1];
    let partition = first.partitioner().partition_of(&intent.key);
    assert!(first.partitioner().owns(&intent.key));

    cluster.leadership().force_leader(partition, second.node());
    tokio::time::timeout(WAIT, async {
        while !second.partitioner().owns(&intent.key) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert!(first.partitioner().owns(&intent.key));

    let key = cluster.service().submit(intent).await.unwrap();
    let data = wait_for_state(cluster.store().as_ref(), &key, IntentState::Installed).await;
    wait_converged(&cluster).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(data.version(), 3);
    assert_eq!(audit.violations(), Vec::<String>::new());
    assert_eq!(audit.events(), 4);
    // each of the four writes has at most one losing replica
    assert!(cluster.stats().cas_conflicts <= 4);
    assert!(data.installed().unwrap().iter().all(|rule| fabric.contains(rule)));
    cluster.shutdown().await.unwrap();
}

/// Tenet: Stopping a replica hands its partitions over without losing work.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn survivors_finish_a_stopped_replicas_work() {
    let fabric = InMemoryFabric::new();
    let mut cluster = start_cluster(3, &fabric).await;
    let service = cluster.service();

    let mut keys = Vec::new();
    for i in 0..20 {
        let device = format!("s{}", i % 4 + 1);
        keys.push(
            service
                .submit(objective_intent(&format!("handover-{i:02}"), &[device.as_str()]))
                .await
                .unwrap(),
        );
    }
    cluster.stop_replica(0).await.unwrap();

    wait_converged(&cluster).await;
    for key in &keys {
        assert_eq!(service.get_intent_state(key).await, Some(IntentState::Installed));
    }
    assert_eq!(fabric.rule_count(), keys.len());
    assert_eq!(cluster.replicas().len(), 2);
    let owned: usize = cluster
        .replicas()
        .iter()
        .map(|r| r.partitioner().owned_partitions().len())
        .sum();
    assert_eq!(owned, 4);
    cluster.shutdown().await.unwrap();
}
