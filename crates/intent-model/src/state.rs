//! Intent lifecycle states and the transition table

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    InstallReq,
    Compiling,
    Installing,
    Installed,
    WithdrawReq,
    Withdrawing,
    Withdrawn,
    Failed,
    Corrupt,
}

impl IntentState {
    /// Every state, in lifecycle order
    pub const ALL: [IntentState; 9] = [
        IntentState::InstallReq,
        IntentState::Compiling,
        IntentState::Installing,
        IntentState::Installed,
        IntentState::WithdrawReq,
        IntentState::Withdrawing,
        IntentState::Withdrawn,
        IntentState::Failed,
        IntentState::Corrupt,
    ];

    /// States in which no phase work is outstanding
    ///
    /// A pending request may only be promoted over a stable record.
    #[inline]
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            Self::Installed | Self::Withdrawn | Self::Failed | Self::Corrupt
        )
    }

    /// States with no outgoing automatic transition
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Withdrawn | Self::Failed | Self::Corrupt)
    }

    /// Whether the engine still has work to do for this state
    #[inline]
    #[must_use]
    pub fn needs_processing(self) -> bool {
        !self.is_stable()
    }

    /// Allowed next states
    #[inline]
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [IntentState] {
        allowed_transitions(self)
    }

    /// Whether `to` may follow `self`
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: IntentState) -> bool {
        allowed_transitions(self).contains(&to)
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InstallReq => "INSTALL_REQ",
            Self::Compiling => "COMPILING",
            Self::Installing => "INSTALLING",
            Self::Installed => "INSTALLED",
            Self::WithdrawReq => "WITHDRAW_REQ",
            Self::Withdrawing => "WITHDRAWING",
            Self::Withdrawn => "WITHDRAWN",
            Self::Failed => "FAILED",
            Self::Corrupt => "CORRUPT",
        };
        f.write_str(name)
    }
}

/// Validates a state transition.
///
/// # Errors
/// Returns [`ModelError::IllegalTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: IntentState, to: IntentState) -> Result<(), ModelError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ModelError::IllegalTransition { from, to })
    }
}

/// Transitions the engine may perform on its own
#[must_use]
pub fn allowed_transitions(from: IntentState) -> &'static [IntentState] {
    use IntentState::*;
    match from {
        InstallReq => &[Compiling, Installing, Failed],
        Compiling => &[Installing, Failed],
        Installing => &[Installed, Failed, Corrupt],
        Installed => &[InstallReq, WithdrawReq],
        WithdrawReq => &[Withdrawing, Corrupt],
        Withdrawing => &[Withdrawn, Corrupt],
        Failed => &[InstallReq, WithdrawReq],
        Withdrawn => &[InstallReq],
        Corrupt => &[],
    }
}

/// Transitions only an operator may request
///
/// CORRUPT never clears by itself; device state must be reconciled out of band
/// before an operator resubmits.
#[must_use]
pub fn operator_transitions(from: IntentState) -> &'static [IntentState] {
    use IntentState::*;
    match from {
        Corrupt => &[InstallReq, WithdrawReq],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn install_path_is_allowed() {
        use IntentState::*;
        assert!(validate_transition(InstallReq, Compiling).is_ok());
        assert!(validate_transition(Compiling, Installing).is_ok());
        assert!(validate_transition(Installing, Installed).is_ok());
        assert!(validate_transition(InstallReq, Installing).is_ok());
    }

    #[test]
    fn corrupt_is_only_reachable_from_unsafe_phases() {
        use IntentState::*;
        let sources: Vec<_> = IntentState::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(Corrupt))
            .collect();
        assert_eq!(sources, vec![Installing, WithdrawReq, Withdrawing]);
    }

    #[test]
    fn corrupt_has_no_automatic_exit() {
        assert!(IntentState::Corrupt.allowed_transitions().is_empty());
        assert_eq!(operator_transitions(IntentState::Corrupt).len(), 2);
        assert!(operator_transitions(IntentState::Failed).is_empty());
    }

    #[test]
    fn compile_failure_never_corrupts() {
        assert!(!IntentState::InstallReq.can_transition_to(IntentState::Corrupt));
        assert!(!IntentState::Compiling.can_transition_to(IntentState::Corrupt));
    }

    #[test]
    fn state_display_matches_wire_names() {
        assert_eq!(IntentState::WithdrawReq.to_string(), "WITHDRAW_REQ");
        let json = serde_json::to_string(&IntentState::InstallReq).unwrap();
        assert_eq!(json, "\"INSTALL_REQ\"");
    }

    fn any_state() -> impl Strategy<Value = IntentState> {
        prop::sample::select(IntentState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_validate_agrees_with_table(from in any_state(), to in any_state()) {
            let res = validate_transition(from, to);
            prop_assert_eq!(res.is_ok(), allowed_transitions(from).contains(&to));
        }

        #[test]
        fn prop_stable_states_only_leave_through_requests(from in any_state()) {
            if from.is_stable() {
                for next in allowed_transitions(from) {
                    prop_assert!(matches!(next, IntentState::InstallReq | IntentState::WithdrawReq));
                }
            }
        }
    }
}
