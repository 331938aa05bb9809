//! Cluster simulator
//!
//! Drives a seeded random workload through an in-process cluster, optionally
//! failing one replica over midway, and checks the resulting store and
//! device state:
//!
//! - every key converges to a stable state
//! - versions seen by listeners are gap-free per key
//! - the rules of every INSTALLED intent are present on the fabric

use crate::cluster::LocalCluster;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::stats::StatsSnapshot;
use intent_compiler::StaticTopology;
use intent_installer::InMemoryFabric;
use intent_model::{
    AppId, ConnectPoint, FlowRule, Intent, IntentKey, IntentPayload, IntentState,
};
use intent_store::{IntentEvent, IntentListener};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SWITCHES: usize = 8;

/// Simulation parameters
#[derive(Debug, Clone, Serialize)]
pub struct SimulationConfig {
    /// Replicas in the cluster
    pub replicas: usize,
    /// Intents to submit
    pub intents: usize,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Probability that a batch meets unreachable devices
    pub fault_rate: f64,
    /// Fraction of installed intents withdrawn afterwards
    pub withdraw_ratio: f64,
    /// Stop the first replica halfway through the workload
    pub failover: bool,
    /// Bound on waiting for convergence
    pub timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            intents: 50,
            seed: 42,
            fault_rate: 0.0,
            withdraw_ratio: 0.3,
            failover: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub converged: bool,
    /// Records per lifecycle state
    pub states: BTreeMap<String, usize>,
    /// Counters summed over replicas still running at the end
    pub stats: StatsSnapshot,
    pub fabric_rules: usize,
    pub listener_events: u64,
    pub violations: Vec<String>,
    pub elapsed_ms: u64,
}

impl SimulationReport {
    /// Check if the run converged without violations
    #[must_use]
    pub fn passed(&self) -> bool {
        self.converged && self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Intent Cluster Simulation Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Replicas: {}", self.config.replicas);
        let _ = writeln!(report, "Intents: {}", self.config.intents);
        let _ = writeln!(report, "Fault Rate: {}", self.config.fault_rate);
        let _ = writeln!(report, "Converged: {}", self.converged);
        let _ = writeln!(report, "Elapsed: {}ms", self.elapsed_ms);
        let _ = writeln!(report, "Fabric Rules: {}", self.fabric_rules);
        let _ = writeln!(report, "Listener Events: {}", self.listener_events);

        let _ = writeln!(report, "\n=== States ===");
        for (state, count) in &self.states {
            let _ = writeln!(report, "{state}: {count}");
        }

        let _ = writeln!(report, "\n=== Engine ===");
        let _ = writeln!(report, "Transitions: {}", self.stats.transitions);
        let _ = writeln!(report, "Promotions: {}", self.stats.promotions);
        let _ = writeln!(report, "CAS Conflicts: {}", self.stats.cas_conflicts);
        let _ = writeln!(report, "Abandoned: {}", self.stats.abandoned);
        let _ = writeln!(report, "Retries: {}", self.stats.retries);
        let _ = writeln!(report, "Rejected Requests: {}", self.stats.rejected_requests);
        let _ = writeln!(report, "Panicked Passes: {}", self.stats.panics);

        if !self.violations.is_empty() {
            let _ = writeln!(report, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASSED" } else { "FAILED" }
        );
        report
    }
}

/// Listener asserting per-key versions arrive gap-free
#[derive(Debug, Default)]
pub struct VersionAudit {
    last: Mutex<HashMap<IntentKey, u64>>,
    events: Mutex<u64>,
    violations: Mutex<Vec<String>>,
}

impl VersionAudit {
    /// Violations recorded so far
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Events observed so far
    #[must_use]
    pub fn events(&self) -> u64 {
        *self.events.lock()
    }
}

impl IntentListener for VersionAudit {
    fn on_intent_state_changed(&self, event: &IntentEvent) {
        *self.events.lock() += 1;
        let previous = self.last.lock().insert(event.key.clone(), event.version);
        let expected = previous.map_or(0, |v| v + 1);
        if event.version != expected {
            self.violations.lock().push(format!(
                "{}: version {} followed {:?}",
                event.key, event.version, previous
            ));
        }
    }
}

fn random_intent(rng: &mut StdRng, index: usize) -> Intent {
    let key = IntentKey::new(format!("sim-{index:04}"));
    let app = AppId::new("org.example.sim");
    let switch = |rng: &mut StdRng| format!("s{}", rng.gen_range(1..=SWITCHES));

    let payload = match rng.gen_range(0..3) {
        0 => {
            let src = switch(rng);
            let dst = switch(rng);
            IntentPayload::connectivity(
                ConnectPoint::new(src.as_str(), 100),
                ConnectPoint::new(dst.as_str(), 101),
            )
        }
        1 => {
            let size = rng.gen_range(2..=4);
            let group: Vec<String> = (0..size).map(|_| switch(rng)).collect();
            IntentPayload::isolation(group.iter().map(String::as_str))
        }
        _ => {
            let device = switch(rng);
            IntentPayload::FlowObjective {
                rules: vec![FlowRule::new(device.as_str(), 0)
                    .matching("tag", key.as_str())
                    .then("output:controller")],
            }
        }
    };

    Intent::new(key, app, payload)
}

/// Run a seeded workload against a fresh cluster
///
/// # Errors
/// Returns error if the cluster cannot start or a client call fails
pub async fn run_simulation(
    sim: SimulationConfig,
    engine: EngineConfig,
) -> Result<SimulationReport, EngineError> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(sim.seed);
    let audit = Arc::new(VersionAudit::default());
    let fabric = InMemoryFabric::new().with_fault_rate(sim.fault_rate, sim.seed);

    let mut cluster = LocalCluster::builder()
        .with_replicas(sim.replicas.max(1))
        .with_config(engine)
        .with_topology(StaticTopology::linear(SWITCHES, 10_000))
        .with_fabric(fabric)
        .with_listener(Arc::clone(&audit) as Arc<dyn IntentListener>)
        .start()
        .await?;
    let service = cluster.service();

    tracing::info!(seed = sim.seed, replicas = sim.replicas, intents = sim.intents, "simulation started");

    let mut keys = Vec::with_capacity(sim.intents);
    for index in 0..sim.intents {
        keys.push(service.submit(random_intent(&mut rng, index)).await?);
        if sim.failover && sim.replicas > 1 && index == sim.intents / 2 {
            tracing::info!("stopping first replica");
            cluster.stop_replica(0).await?;
        }
        if index % 8 == 0 {
            tokio::task::yield_now().await;
        }
    }
    let mut converged = cluster.wait_converged(sim.timeout).await;

    let ratio = sim.withdraw_ratio.clamp(0.0, 1.0);
    for key in &keys {
        let installed = service.get_intent_state(key).await == Some(IntentState::Installed);
        if installed && rng.gen_bool(ratio) {
            service.withdraw(key).await?;
        }
    }
    converged &= cluster.wait_converged(sim.timeout).await;

    let mut violations = audit.violations();
    for data in service.get_intents().await {
        if data.state() != IntentState::Installed {
            continue;
        }
        for rule in data.installed().unwrap_or_default() {
            if !cluster.fabric().contains(rule) {
                violations.push(format!("{}: rule {} missing on {}", data.key(), rule.id(), rule.device));
            }
        }
    }

    let states = cluster
        .state_counts()
        .await
        .into_iter()
        .map(|(state, n)| (state.to_string(), n))
        .collect();

    let report = SimulationReport {
        converged,
        states,
        stats: cluster.stats(),
        fabric_rules: cluster.fabric().rule_count(),
        listener_events: audit.events(),
        violations,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        config: sim,
    };
    cluster.shutdown().await?;
    tracing::info!(passed = report.passed(), elapsed_ms = report.elapsed_ms, "simulation finished");
    Ok(report)
}
