//! Store contract

use crate::error::StoreError;
use crate::event::StoreEvent;
use intent_model::{IntentData, IntentKey, IntentRequest, IntentState};
use tokio::sync::broadcast;

/// Versioned, replicated record of every intent
///
/// Writes are compare-and-swap on the record version and are rejected, never
/// merged, on conflict. Every accepted mutation is published on the change
/// stream to all subscribers, local and remote alike.
#[async_trait::async_trait]
pub trait IntentStore: Send + Sync {
    /// Current record of `key`
    async fn get(&self, key: &IntentKey) -> Option<IntentData>;

    /// Compare-and-swap write
    ///
    /// Succeeds only if the stored version equals `expected` (`None` meaning
    /// "no record yet") and `data.version()` is `expected + 1` (or 0).
    ///
    /// # Returns
    /// `Ok(true)` when written, `Ok(false)` on version conflict
    ///
    /// # Errors
    /// Malformed writes (wrong key, non-sequential version)
    async fn write(
        &self,
        key: &IntentKey,
        expected: Option<u64>,
        data: IntentData,
    ) -> Result<bool, StoreError>;

    /// Compare-and-swap write that also consumes the pending request it realises
    ///
    /// The pending entry is cleared only if it is still the request identified
    /// by `request`, so a newer submission is never lost.
    async fn promote(
        &self,
        key: &IntentKey,
        expected: Option<u64>,
        data: IntentData,
        request: &IntentRequest,
    ) -> Result<bool, StoreError>;

    /// Record a request for later promotion (latest request per key wins)
    async fn submit(&self, request: IntentRequest) -> Result<(), StoreError>;

    /// Drop a pending request that cannot be promoted
    ///
    /// Removes the entry only if it is still `request`.
    ///
    /// # Returns
    /// Whether the entry was removed
    async fn discard_pending(&self, key: &IntentKey, request: &IntentRequest) -> bool;

    /// Request waiting for `key`, if any
    async fn pending(&self, key: &IntentKey) -> Option<IntentRequest>;

    /// Every key with a current record or a pending request
    async fn keys(&self) -> Vec<IntentKey>;

    /// Number of current records
    async fn len(&self) -> usize;

    /// Whether no current record exists
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Records currently in `state`
    async fn intents_in_state(&self, state: IntentState) -> Vec<IntentData>;

    /// Subscribe to the change stream
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
