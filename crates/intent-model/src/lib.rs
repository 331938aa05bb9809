//! Intent Model
//!
//! Core data types shared by every component of the reconciliation engine.
//!
//! # Core Concepts
//!
//! - [`Intent`]: immutable declaration of desired connectivity
//! - [`Installable`]: compiled artifact, either a more specific intent or a [`FlowRule`]
//! - [`IntentData`]: the versioned, persisted record of one intent's lifecycle
//! - [`IntentState`]: lifecycle states and the allowed transition table
//! - [`Digest`]: 32-byte Blake3 digest used for rule identity and cycle detection
//!
//! # Example
//!
//! ```rust,ignore
//! use intent_model::{Intent, IntentData, IntentKey, IntentPayload, AppId};
//!
//! let intent = Intent::new(
//!     IntentKey::new("k1"),
//!     AppId::new("org.example.app"),
//!     IntentPayload::isolation(["s1", "s2"]),
//! );
//! let data = IntentData::submitted(intent);
//! assert_eq!(data.version(), 0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod data;
mod digest;
mod error;
mod flow;
mod ids;
mod installable;
mod intent;
mod state;

// Re-exports
pub use data::{IntentData, IntentRequest, RequestKind};
pub use digest::Digest;
pub use error::ModelError;
pub use flow::{FlowOp, FlowRule, FlowRuleId};
pub use ids::{AppId, ConnectPoint, DeviceId, IntentKey, NodeId};
pub use installable::Installable;
pub use intent::{Constraint, Intent, IntentKind, IntentPayload};
pub use state::{allowed_transitions, operator_transitions, validate_transition, IntentState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
