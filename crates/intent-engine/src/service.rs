//! Client-facing intent API
//!
//! Requests only land in the store's pending map; the owning replica picks
//! them up. Outcomes are observed through queries or listeners, never
//! returned from these calls.

use crate::error::EngineError;
use intent_model::{FlowRule, Intent, IntentData, IntentKey, IntentRequest, IntentState, RequestKind};
use intent_store::IntentStore;
use std::sync::Arc;

/// Submit, withdraw and query intents
#[derive(Clone)]
pub struct IntentService {
    store: Arc<dyn IntentStore>,
}

impl IntentService {
    /// Create service over a store
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn IntentStore>) -> Self {
        Self { store }
    }

    /// Request installation; replaces any earlier intent under the same key
    ///
    /// # Errors
    /// Returns [`EngineError::Store`] if the store rejects the request
    pub async fn submit(&self, intent: Intent) -> Result<IntentKey, EngineError> {
        let key = intent.key.clone();
        tracing::debug!(%key, kind = %intent.kind(), "intent submitted");
        self.store.submit(IntentRequest::install(intent)).await?;
        Ok(key)
    }

    /// Request withdrawal
    ///
    /// # Errors
    /// Returns [`EngineError::UnknownIntent`] if the key has neither a record
    /// nor a pending request
    pub async fn withdraw(&self, key: &IntentKey) -> Result<(), EngineError> {
        if self.store.get(key).await.is_none() && self.store.pending(key).await.is_none() {
            return Err(EngineError::UnknownIntent(key.clone()));
        }
        tracing::debug!(%key, "withdrawal requested");
        self.store.submit(IntentRequest::withdraw(key.clone())).await?;
        Ok(())
    }

    /// Resubmit a CORRUPT intent after device state was repaired out of band
    ///
    /// This is the only way out of CORRUPT.
    ///
    /// # Errors
    /// - [`EngineError::UnknownIntent`] if no record exists
    /// - [`EngineError::NotCorrupt`] if the record is in any other state
    /// - [`EngineError::KeyMismatch`] if a replacement intent names another key
    pub async fn operator_reset(&self, key: &IntentKey, kind: RequestKind) -> Result<(), EngineError> {
        let data = self
            .store
            .get(key)
            .await
            .ok_or_else(|| EngineError::UnknownIntent(key.clone()))?;
        if data.state() != IntentState::Corrupt {
            return Err(EngineError::NotCorrupt {
                key: key.clone(),
                state: data.state(),
            });
        }

        let request = match kind {
            RequestKind::Install(intent) if &intent.key != key => {
                return Err(EngineError::KeyMismatch {
                    expected: key.clone(),
                    found: intent.key,
                })
            }
            RequestKind::Install(intent) => IntentRequest::install(intent),
            RequestKind::Withdraw => IntentRequest::withdraw(key.clone()),
        };
        tracing::warn!(%key, target = %request.target_state(), "operator reset of corrupt intent");
        self.store.submit(request.by_operator()).await?;
        Ok(())
    }

    /// Current record
    pub async fn get_intent_data(&self, key: &IntentKey) -> Option<IntentData> {
        self.store.get(key).await
    }

    /// Current lifecycle state
    pub async fn get_intent_state(&self, key: &IntentKey) -> Option<IntentState> {
        self.store.get(key).await.map(|d| d.state())
    }

    /// Every current record, ordered by key
    pub async fn get_intents(&self) -> Vec<IntentData> {
        let mut intents = Vec::new();
        for key in self.store.keys().await {
            if let Some(data) = self.store.get(&key).await {
                intents.push(data);
            }
        }
        intents
    }

    /// Number of current records
    pub async fn intent_count(&self) -> usize {
        self.store.len().await
    }

    /// Rules believed to be on the devices for `key`
    pub async fn installable_rules(&self, key: &IntentKey) -> Option<Vec<FlowRule>> {
        self.store
            .get(key)
            .await
            .and_then(|d| d.installed().map(<[FlowRule]>::to_vec))
    }
}

impl std::fmt::Debug for IntentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentService").finish_non_exhaustive()
    }
}
