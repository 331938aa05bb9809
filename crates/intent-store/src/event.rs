//! Change notifications

use intent_model::{IntentData, IntentKey, IntentState};

/// Notification published for every accepted store mutation
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The current record of `key` was replaced
    Updated {
        key: IntentKey,
        old_state: Option<IntentState>,
        data: IntentData,
    },
    /// A request for `key` is waiting for promotion
    PendingRequest { key: IntentKey },
}

impl StoreEvent {
    /// Key the event concerns
    #[inline]
    #[must_use]
    pub fn key(&self) -> &IntentKey {
        match self {
            Self::Updated { key, .. } | Self::PendingRequest { key } => key,
        }
    }
}
