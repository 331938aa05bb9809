//! Versioned intent records
//!
//! [`IntentData`] is the only persisted, authoritative unit of mutable state.
//! Every accepted write carries a version exactly one above the record it
//! replaces; the store rejects anything else.

use crate::error::ModelError;
use crate::flow::FlowRule;
use crate::ids::IntentKey;
use crate::installable::Installable;
use crate::intent::Intent;
use crate::state::{operator_transitions, validate_transition, IntentState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a submitted request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Install (or replace) the intent
    Install(Intent),
    /// Withdraw whatever is currently recorded under the key
    Withdraw,
}

/// A request waiting to be promoted into the current record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Intent the request is about
    pub key: IntentKey,
    /// Install or withdraw
    pub kind: RequestKind,
    /// Set only by the operator path; allows leaving CORRUPT
    pub operator_override: bool,
    /// When the client handed the request over
    pub submitted_at: DateTime<Utc>,
}

impl IntentRequest {
    /// Install request for an intent
    #[must_use]
    pub fn install(intent: Intent) -> Self {
        Self {
            key: intent.key.clone(),
            kind: RequestKind::Install(intent),
            operator_override: false,
            submitted_at: Utc::now(),
        }
    }

    /// Withdraw request for a key
    #[must_use]
    pub fn withdraw(key: IntentKey) -> Self {
        Self {
            key,
            kind: RequestKind::Withdraw,
            operator_override: false,
            submitted_at: Utc::now(),
        }
    }

    /// Mark as issued by an operator
    #[inline]
    #[must_use]
    pub fn by_operator(mut self) -> Self {
        self.operator_override = true;
        self
    }

    /// State the promoted record will start in
    #[inline]
    #[must_use]
    pub fn target_state(&self) -> IntentState {
        match self.kind {
            RequestKind::Install(_) => IntentState::InstallReq,
            RequestKind::Withdraw => IntentState::WithdrawReq,
        }
    }
}

/// Persisted lifecycle record of one intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentData {
    key: IntentKey,
    intent: Intent,
    state: IntentState,
    version: u64,
    /// Output of the most recent compilation (or removal plan while withdrawing)
    compiled: Vec<Installable>,
    /// Rules of the last successful install; `None` if nothing is on the devices
    installed: Option<Vec<FlowRule>>,
    error_count: u32,
    updated_at: DateTime<Utc>,
}

impl IntentData {
    /// First record of a freshly submitted intent (version 0, INSTALL_REQ)
    #[must_use]
    pub fn submitted(intent: Intent) -> Self {
        Self {
            key: intent.key.clone(),
            intent,
            state: IntentState::InstallReq,
            version: 0,
            compiled: Vec::new(),
            installed: None,
            error_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Build the record that results from promoting a pending request
    ///
    /// # Errors
    /// - [`ModelError::IllegalTransition`] if the current state does not accept the request
    /// - [`ModelError::NothingToWithdraw`] for a withdrawal of an unknown key
    pub fn promote(current: Option<&IntentData>, request: &IntentRequest) -> Result<Self, ModelError> {
        let target = request.target_state();

        let Some(current) = current else {
            return match &request.kind {
                RequestKind::Install(intent) => Ok(Self::submitted(intent.clone())),
                RequestKind::Withdraw => Err(ModelError::NothingToWithdraw(request.key.to_string())),
            };
        };

        let operator_allowed =
            request.operator_override && operator_transitions(current.state).contains(&target);
        if !operator_allowed {
            validate_transition(current.state, target)?;
        }

        let intent = match &request.kind {
            RequestKind::Install(intent) => intent.clone(),
            RequestKind::Withdraw => current.intent.clone(),
        };

        Ok(Self {
            key: current.key.clone(),
            intent,
            state: target,
            version: current.version + 1,
            compiled: Vec::new(),
            installed: current.installed.clone(),
            error_count: 0,
            updated_at: Utc::now(),
        })
    }

    /// Successor record in `state`, one version later
    ///
    /// # Errors
    /// Returns [`ModelError::IllegalTransition`] if the table forbids the move
    pub fn next(&self, state: IntentState) -> Result<Self, ModelError> {
        validate_transition(self.state, state)?;
        Ok(Self {
            state,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// With compiled installables
    #[inline]
    #[must_use]
    pub fn with_compiled(mut self, compiled: Vec<Installable>) -> Self {
        self.compiled = compiled;
        self
    }

    /// With the installed rule set
    #[inline]
    #[must_use]
    pub fn with_installed(mut self, installed: Option<Vec<FlowRule>>) -> Self {
        self.installed = installed;
        self
    }

    /// Add failed attempts to the audit counter
    #[inline]
    #[must_use]
    pub fn with_errors(mut self, failures: u32) -> Self {
        self.error_count = self.error_count.saturating_add(failures);
        self
    }

    /// Intent key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &IntentKey {
        &self.key
    }

    /// Intent payload
    #[inline]
    #[must_use]
    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    /// Lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> IntentState {
        self.state
    }

    /// Optimistic-concurrency version
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Most recent compilation output
    #[inline]
    #[must_use]
    pub fn compiled(&self) -> &[Installable] {
        &self.compiled
    }

    /// Rules of the last successful install
    #[inline]
    #[must_use]
    pub fn installed(&self) -> Option<&[FlowRule]> {
        self.installed.as_deref()
    }

    /// Whether a prior install for this key succeeded
    ///
    /// Failures after a prior install are unsafe: devices may be half-updated.
    #[inline]
    #[must_use]
    pub fn has_prior_install(&self) -> bool {
        self.installed.is_some()
    }

    /// Failed attempts recorded for this lifecycle
    #[inline]
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Time of the last write
    #[inline]
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
