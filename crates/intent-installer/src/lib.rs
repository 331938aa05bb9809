//! Installer / Batch Executor
//!
//! Applies flow-rule operations to the network as one logical unit and reports
//! the aggregate outcome.
//!
//! # Core Concepts
//!
//! - [`DeviceProgrammer`]: asynchronous southbound service; submission returns
//!   immediately and the report arrives on a oneshot channel
//! - [`Installer`]: submits a batch, awaits the report (bounded by a timeout)
//!   and classifies it as a [`BatchOutcome`]
//! - [`InMemoryFabric`]: idempotent simulated devices with fault injection
//!
//! Partial failures are never accepted as success. The installer does not
//! retry; that policy belongs to the phase state machine.
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_installer::{InMemoryFabric, Installer, transition_ops};
//!
//! let fabric = InMemoryFabric::new();
//! let installer = Installer::new(Arc::new(fabric.clone()));
//! let outcome = installer.apply(transition_ops(None, &rules)).await?;
//! assert!(outcome.is_success());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod batch;
mod error;
mod fabric;
mod installer;

pub use batch::{
    removal_ops, transition_ops, BatchOutcome, BatchReport, DeviceProgrammer, FlowBatch, ReportStatus,
};
pub use error::InstallError;
pub use fabric::{Fault, InMemoryFabric};
pub use installer::{Installer, DEFAULT_INSTALL_TIMEOUT};
