//! Compiler Pipeline
//!
//! Translates intents into flat lists of device-programmable flow rules.
//!
//! # Core Concepts
//!
//! - [`IntentCompiler`]: pure per-kind translation `(intent, topology) -> installables`
//! - [`CompilerRegistry`]: one compiler per [`IntentKind`](intent_model::IntentKind)
//! - [`CompilerPipeline`]: recursive compilation with a stage bound and cycle detection
//! - [`TopologyView`]: read-only device/link/bandwidth snapshot
//! - [`BandwidthLedger`]: bandwidth held by each intent, shared across replicas
//!
//! Compilation performs no device I/O. Compiling the same intent twice against
//! the same snapshot yields identical output.
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_compiler::{CompilerPipeline, CompilerRegistry, StaticTopology};
//!
//! let pipeline = CompilerPipeline::new(
//!     Arc::new(CompilerRegistry::with_builtins()),
//!     Arc::new(StaticTopology::linear(3, 1000)),
//! );
//! let rules = pipeline.compile(&intent)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod compilers;
mod error;
mod pipeline;
mod registry;
mod resources;
mod topology;

pub use compilers::{ConnectivityCompiler, FlowObjectiveCompiler, IsolationCompiler, PathCompiler};
pub use error::CompileError;
pub use pipeline::{CompilerPipeline, DEFAULT_MAX_COMPILE_DEPTH};
pub use registry::{CompilerRegistry, IntentCompiler};
pub use resources::{BandwidthLedger, Claim, ReservedView};
pub use topology::{Link, StaticTopology, TopologyView};
