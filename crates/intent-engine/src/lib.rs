//! Intent Engine
//!
//! Orchestration core of the reconciliation engine: drives each intent from
//! submission to converged device state across a cluster of replicas.
//!
//! # Architecture
//!
//! ```text
//! IntentService ──submit──► IntentStore (pending) ──change stream──► Replica
//!                                                                       │
//!                                      owns(key)? ◄── WorkPartitioner ◄─┤
//!                                                                       ▼
//!                      CompilerPipeline ◄── Phase::advance ──► Installer
//!                                                │
//!                                   CAS write ◄──┘
//! ```
//!
//! # Core Concepts
//!
//! - [`Phase`]: transient "work to do next", derived from a persisted snapshot
//! - [`Replica`]: per-node worker pool with per-key dedup and bounded concurrency
//! - [`IntentService`]: submit / withdraw / operator reset / queries
//! - [`RetryPolicy`]: bounded exponential backoff for transient device errors
//! - [`LocalCluster`]: in-process multi-replica cluster over simulated devices
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_engine::{EngineConfig, LocalCluster};
//!
//! let cluster = LocalCluster::builder().with_replicas(3).start().await?;
//! let key = cluster.service().submit(intent).await?;
//! assert!(cluster.wait_converged(Duration::from_secs(5)).await);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod phase;
pub mod replica;
pub mod retry;
pub mod service;
pub mod simulator;
pub mod stats;

pub use cluster::{ClusterBuilder, LocalCluster};
pub use config::{ConfigError, EngineConfig, RetryConfig};
pub use error::EngineError;
pub use phase::{Ownership, Phase, PhaseContext, PhaseResult};
pub use replica::{Collaborators, PassOutcome, Replica};
pub use retry::RetryPolicy;
pub use service::IntentService;
pub use stats::{EngineStats, StatsSnapshot};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
