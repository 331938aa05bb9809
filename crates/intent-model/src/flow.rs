//! Device-programmable flow rules
//!
//! A [`FlowRule`] is the final, installer-ready primitive. Its identity is
//! the digest of its content and its owning intent, so re-sending an
//! identical rule is recognisably the same operation, while two intents that
//! need the same match/action still hold separate device entries.

use crate::digest::Digest;
use crate::ids::{DeviceId, IntentKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Content-derived identifier of a flow rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowRuleId(pub Digest);

impl fmt::Display for FlowRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short())
    }
}

/// Match/action rule targeted at a single device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRule {
    /// Device the rule is programmed on
    pub device: DeviceId,
    /// Match priority on the device
    pub priority: u32,
    /// Match criteria, field to value
    pub selector: BTreeMap<String, String>,
    /// Actions, applied in order
    pub treatment: Vec<String>,
    /// Intent the rule was compiled for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<IntentKey>,
}

impl FlowRule {
    /// Create a rule with an empty selector and treatment
    #[inline]
    #[must_use]
    pub fn new(device: impl Into<DeviceId>, priority: u32) -> Self {
        Self {
            device: device.into(),
            priority,
            selector: BTreeMap::new(),
            treatment: Vec::new(),
            owner: None,
        }
    }

    /// Attribute the rule to an intent
    #[inline]
    #[must_use]
    pub fn owned_by(mut self, owner: IntentKey) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Add a match criterion
    #[inline]
    #[must_use]
    pub fn matching(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(field.into(), value.into());
        self
    }

    /// Append an action
    #[inline]
    #[must_use]
    pub fn then(mut self, action: impl Into<String>) -> Self {
        self.treatment.push(action.into());
        self
    }

    /// Identity derived from content and owner
    #[must_use]
    pub fn id(&self) -> FlowRuleId {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(self.device.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.priority.to_le_bytes());
        for (field, value) in &self.selector {
            buf.extend_from_slice(field.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf.push(0xff);
        for action in &self.treatment {
            buf.extend_from_slice(action.as_bytes());
            buf.push(0);
        }
        if let Some(owner) = &self.owner {
            buf.push(0xfe);
            buf.extend_from_slice(owner.as_str().as_bytes());
        }
        FlowRuleId(Digest::compute(&buf))
    }
}

/// One operation of a device batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowOp {
    /// Install the rule (no-op if already present)
    Add(FlowRule),
    /// Remove the rule (no-op if absent)
    Remove(FlowRule),
}

impl FlowOp {
    /// Rule this operation targets
    #[inline]
    #[must_use]
    pub fn rule(&self) -> &FlowRule {
        match self {
            Self::Add(rule) | Self::Remove(rule) => rule,
        }
    }

    /// Identity of the targeted rule
    #[inline]
    #[must_use]
    pub fn id(&self) -> FlowRuleId {
        self.rule().id()
    }

    /// Whether this operation removes state
    #[inline]
    #[must_use]
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_id_is_content_derived() {
        let a = FlowRule::new("s1", 10).matching("in_port", "1").then("output:2");
        let b = FlowRule::new("s1", 10).matching("in_port", "1").then("output:2");
        let c = FlowRule::new("s1", 10).matching("in_port", "1").then("output:3");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn rule_id_distinguishes_selector_from_treatment() {
        let a = FlowRule::new("s1", 1).matching("x", "y");
        let b = FlowRule::new("s1", 1).then("x=y");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn same_rule_for_two_owners_has_two_identities() {
        let rule = FlowRule::new("s1", 10).matching("dst_device", "s2").then("drop");
        let a = rule.clone().owned_by(IntentKey::new("iso-a"));
        let b = rule.clone().owned_by(IntentKey::new("iso-b"));
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), rule.id());
        assert_eq!(a.id(), rule.owned_by(IntentKey::new("iso-a")).id());
    }

    #[test]
    fn flow_op_accessors() {
        let rule = FlowRule::new("s1", 1);
        let op = FlowOp::Remove(rule.clone());
        assert!(op.is_remove());
        assert_eq!(op.id(), rule.id());
    }
}
