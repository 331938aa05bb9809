//! Intent declarations
//!
//! An [`Intent`] never mutates. Submitting a new intent under an existing key
//! replaces the reference held by the store; it does not edit in place.

use crate::digest::Digest;
use crate::error::ModelError;
use crate::flow::FlowRule;
use crate::ids::{AppId, ConnectPoint, DeviceId, IntentKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default priority assigned to intents that do not specify one
pub const DEFAULT_PRIORITY: u32 = 100;

/// Compiler dispatch tag derived from an intent payload
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntentKind(String);

impl IntentKind {
    /// Point-to-point connectivity between two connect points
    pub const CONNECTIVITY: &'static str = "connectivity";
    /// Explicit hop-by-hop path
    pub const PATH: &'static str = "path";
    /// Mutual isolation of a device group
    pub const ISOLATION: &'static str = "isolation";
    /// Pre-built flow rules
    pub const FLOW_OBJECTIVE: &'static str = "flow-objective";

    /// Create a kind tag
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the tag
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntentKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Constraint on how connectivity may be realized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Every traversed link must offer at least this much bandwidth (Mbps)
    Bandwidth { mbps: u64 },
    /// The path must not traverse these devices
    Avoid { devices: Vec<DeviceId> },
    /// The path must not exceed this many links
    MaxHops { hops: usize },
}

/// What connectivity an intent asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentPayload {
    /// Connect `src` to `dst` for traffic matching `selector`
    Connectivity {
        src: ConnectPoint,
        dst: ConnectPoint,
        selector: BTreeMap<String, String>,
        constraints: Vec<Constraint>,
    },
    /// Explicit path; `hops` alternates ingress and egress points per device
    Path {
        hops: Vec<ConnectPoint>,
        selector: BTreeMap<String, String>,
        bandwidth: Option<u64>,
    },
    /// Devices of the group may not reach one another
    Isolation { group: Vec<DeviceId> },
    /// Already-primitive flow rules
    FlowObjective { rules: Vec<FlowRule> },
    /// Application-defined kind, compiled by an application-registered compiler
    Custom {
        kind: String,
        params: BTreeMap<String, serde_json::Value>,
    },
}

impl IntentPayload {
    /// Dispatch tag for the compiler registry
    #[must_use]
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::Connectivity { .. } => IntentKind::new(IntentKind::CONNECTIVITY),
            Self::Path { .. } => IntentKind::new(IntentKind::PATH),
            Self::Isolation { .. } => IntentKind::new(IntentKind::ISOLATION),
            Self::FlowObjective { .. } => IntentKind::new(IntentKind::FLOW_OBJECTIVE),
            Self::Custom { kind, .. } => IntentKind::new(kind.clone()),
        }
    }

    /// Connectivity payload without selector or constraints
    #[must_use]
    pub fn connectivity(src: ConnectPoint, dst: ConnectPoint) -> Self {
        Self::Connectivity {
            src,
            dst,
            selector: BTreeMap::new(),
            constraints: Vec::new(),
        }
    }

    /// Isolation payload over the given devices
    #[must_use]
    pub fn isolation<I, D>(group: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        Self::Isolation {
            group: group.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable user-submitted intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Unique key; derived intents extend their parent's
    pub key: IntentKey,
    /// Submitting application
    pub app_id: AppId,
    /// Priority of the rules compiled from it
    pub priority: u32,
    /// What is asked for
    pub payload: IntentPayload,
}

impl Intent {
    /// Create an intent with default priority
    #[inline]
    #[must_use]
    pub fn new(key: IntentKey, app_id: AppId, payload: IntentPayload) -> Self {
        Self {
            key,
            app_id,
            priority: DEFAULT_PRIORITY,
            payload,
        }
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Dispatch tag of the payload
    #[inline]
    #[must_use]
    pub fn kind(&self) -> IntentKind {
        self.payload.kind()
    }

    /// Derive a child intent produced during compilation
    ///
    /// Children share the parent's owner and priority and are keyed under it.
    #[must_use]
    pub fn derive(&self, suffix: &str, payload: IntentPayload) -> Self {
        Self {
            key: IntentKey::new(format!("{}/{}", self.key, suffix)),
            app_id: self.app_id.clone(),
            priority: self.priority,
            payload,
        }
    }

    /// Content digest of the payload (key excluded)
    ///
    /// Two derivations that ask for the same thing share a digest, which is
    /// what cycle detection needs.
    ///
    /// # Errors
    /// Returns error if the payload cannot be encoded
    pub fn payload_digest(&self) -> Result<Digest, ModelError> {
        Digest::of(&self.payload)
    }
}
