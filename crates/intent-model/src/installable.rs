//! Compilation artifacts

use crate::flow::FlowRule;
use crate::intent::Intent;
use serde::{Deserialize, Serialize};

/// Output of one compilation stage
///
/// Either a more specific intent that must be compiled again, or a flow rule
/// ready for the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Installable {
    /// Needs another compilation pass
    Intent(Box<Intent>),
    /// Ready for the installer
    Rule(FlowRule),
}

impl Installable {
    /// Whether the installer can consume this entry directly
    #[inline]
    #[must_use]
    pub fn is_installer_ready(&self) -> bool {
        matches!(self, Self::Rule(_))
    }

    /// Borrow the flow rule, if this is one
    #[inline]
    #[must_use]
    pub fn as_rule(&self) -> Option<&FlowRule> {
        match self {
            Self::Rule(rule) => Some(rule),
            Self::Intent(_) => None,
        }
    }

    /// Collect the rules of a fully compiled list
    ///
    /// Returns `None` if any entry still needs compilation.
    #[must_use]
    pub fn rules_of(list: &[Installable]) -> Option<Vec<FlowRule>> {
        list.iter().map(|i| i.as_rule().cloned()).collect()
    }
}

impl From<FlowRule> for Installable {
    fn from(rule: FlowRule) -> Self {
        Self::Rule(rule)
    }
}

impl From<Intent> for Installable {
    fn from(intent: Intent) -> Self {
        Self::Intent(Box::new(intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AppId, IntentKey};
    use crate::intent::IntentPayload;

    #[test]
    fn rules_of_rejects_partial_lists() {
        let rule = FlowRule::new("s1", 1);
        let intent = Intent::new(
            IntentKey::new("k"),
            AppId::new("app"),
            IntentPayload::isolation(["s1"]),
        );

        let ready = vec![Installable::from(rule.clone())];
        assert_eq!(Installable::rules_of(&ready), Some(vec![rule.clone()]));

        let partial = vec![Installable::from(rule), Installable::from(intent)];
        assert!(Installable::rules_of(&partial).is_none());
        assert!(!partial[1].is_installer_ready());
    }
}
