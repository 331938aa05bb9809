//! In-process store shared by every replica of a simulated cluster

use crate::error::StoreError;
use crate::event::StoreEvent;
use crate::listener::{EventFanout, IntentEvent, IntentListener};
use crate::store::IntentStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use intent_model::{IntentData, IntentKey, IntentRequest, IntentState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Serializable image of the store contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Latest record per key
    pub current: Vec<IntentData>,
    /// Requests not yet promoted
    pub pending: Vec<IntentRequest>,
}

/// Concurrent in-memory [`IntentStore`]
///
/// Per-key compare-and-swap is atomic under the map's entry lock, and change
/// notifications are published while that lock is held, so every subscriber
/// sees a key's versions in write order.
#[derive(Debug)]
pub struct InMemoryIntentStore {
    current: DashMap<IntentKey, IntentData>,
    pending: DashMap<IntentKey, IntentRequest>,
    changes: broadcast::Sender<StoreEvent>,
    fanout: Option<EventFanout>,
}

impl InMemoryIntentStore {
    /// Create an empty store without listeners
    #[must_use]
    pub fn new(change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            current: DashMap::new(),
            pending: DashMap::new(),
            changes,
            fanout: None,
        }
    }

    /// Create an empty store feeding `listeners`
    ///
    /// Must be called from within a Tokio runtime (spawns the fan-out task).
    #[must_use]
    pub fn with_listeners(change_buffer: usize, listeners: Vec<Arc<dyn IntentListener>>) -> Self {
        let mut store = Self::new(change_buffer);
        if !listeners.is_empty() {
            let (fanout, _handle) = EventFanout::spawn(listeners);
            store.fanout = Some(fanout);
        }
        store
    }

    /// Rebuild a store from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot, change_buffer: usize) -> Self {
        let store = Self::new(change_buffer);
        for data in snapshot.current {
            store.current.insert(data.key().clone(), data);
        }
        for request in snapshot.pending {
            store.pending.insert(request.key.clone(), request);
        }
        store
    }

    /// Copy of the current contents, ordered by key
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut current: Vec<IntentData> = self.current.iter().map(|e| e.value().clone()).collect();
        current.sort_by(|a, b| a.key().cmp(b.key()));
        let mut pending: Vec<IntentRequest> = self.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by(|a, b| a.key.cmp(&b.key));
        StoreSnapshot { current, pending }
    }

    /// Persist a snapshot as JSON
    ///
    /// # Errors
    /// Returns error on encoding or IO failure
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        std::fs::write(path, bytes).map_err(|e| StoreError::io_error(path, e))
    }

    /// Load a store persisted with [`save`](Self::save)
    ///
    /// # Errors
    /// Returns error on IO or decoding failure
    pub fn load(path: &Path, change_buffer: usize) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::io_error(path, e))?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self::from_snapshot(snapshot, change_buffer))
    }

    fn check_write(key: &IntentKey, expected: Option<u64>, data: &IntentData) -> Result<(), StoreError> {
        if data.key() != key {
            return Err(StoreError::KeyMismatch {
                expected: key.clone(),
                actual: data.key().clone(),
            });
        }
        let required = expected.map_or(0, |v| v + 1);
        if data.version() != required {
            return Err(StoreError::NonSequentialVersion {
                expected,
                actual: data.version(),
            });
        }
        Ok(())
    }

    fn cas(
        &self,
        key: &IntentKey,
        expected: Option<u64>,
        data: IntentData,
        request: Option<&IntentRequest>,
    ) -> Result<bool, StoreError> {
        Self::check_write(key, expected, &data)?;

        match self.current.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if Some(slot.get().version()) != expected {
                    return Ok(false);
                }
                let old_state = slot.get().state();
                slot.insert(data.clone());
                self.consume_pending(key, request);
                self.publish(key, Some(old_state), data);
            }
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    return Ok(false);
                }
                slot.insert(data.clone());
                self.consume_pending(key, request);
                self.publish(key, None, data);
            }
        }
        Ok(true)
    }

    fn consume_pending(&self, key: &IntentKey, request: Option<&IntentRequest>) {
        if let Some(request) = request {
            self.pending.remove_if(key, |_, waiting| waiting == request);
        }
    }

    fn publish(&self, key: &IntentKey, old_state: Option<IntentState>, data: IntentData) {
        if let Some(fanout) = &self.fanout {
            fanout.publish(IntentEvent {
                key: key.clone(),
                old_state,
                new_state: data.state(),
                version: data.version(),
            });
        }
        // No receivers is fine: nobody is processing yet.
        let _ = self.changes.send(StoreEvent::Updated {
            key: key.clone(),
            old_state,
            data,
        });
    }
}

impl Default for InMemoryIntentStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_CHANGE_BUFFER)
    }
}

#[async_trait::async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn get(&self, key: &IntentKey) -> Option<IntentData> {
        self.current.get(key).map(|e| e.value().clone())
    }

    async fn write(
        &self,
        key: &IntentKey,
        expected: Option<u64>,
        data: IntentData,
    ) -> Result<bool, StoreError> {
        self.cas(key, expected, data, None)
    }

    async fn promote(
        &self,
        key: &IntentKey,
        expected: Option<u64>,
        data: IntentData,
        request: &IntentRequest,
    ) -> Result<bool, StoreError> {
        self.cas(key, expected, data, Some(request))
    }

    async fn submit(&self, request: IntentRequest) -> Result<(), StoreError> {
        let key = request.key.clone();
        self.pending.insert(key.clone(), request);
        let _ = self.changes.send(StoreEvent::PendingRequest { key });
        Ok(())
    }

    async fn discard_pending(&self, key: &IntentKey, request: &IntentRequest) -> bool {
        self.pending.remove_if(key, |_, waiting| waiting == request).is_some()
    }

    async fn pending(&self, key: &IntentKey) -> Option<IntentRequest> {
        self.pending.get(key).map(|e| e.value().clone())
    }

    async fn keys(&self) -> Vec<IntentKey> {
        let mut keys: BTreeSet<IntentKey> = self.current.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.pending.iter().map(|e| e.key().clone()));
        keys.into_iter().collect()
    }

    async fn len(&self) -> usize {
        self.current.len()
    }

    async fn intents_in_state(&self, state: IntentState) -> Vec<IntentData> {
        let mut found: Vec<IntentData> = self
            .current
            .iter()
            .filter(|e| e.value().state() == state)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.key().cmp(b.key()));
        found
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intent_model::{AppId, Intent, IntentPayload};
    use proptest::prelude::*;

    fn intent(key: &str) -> Intent {
        Intent::new(IntentKey::new(key), AppId::new("app"), IntentPayload::isolation(["s1", "s2"]))
    }

    #[tokio::test]
    async fn first_write_requires_absent_record() {
        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        let data = IntentData::submitted(intent("k"));

        assert!(store.write(&key, None, data.clone()).await.unwrap());
        assert!(!store.write(&key, None, data).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().version(), 0);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_not_merged() {
        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        let v0 = IntentData::submitted(intent("k"));
        store.write(&key, None, v0.clone()).await.unwrap();

        let v1 = v0.next(IntentState::Compiling).unwrap();
        assert!(store.write(&key, Some(0), v1.clone()).await.unwrap());

        // A second writer computed from the same v0 snapshot loses.
        let rival = v0.next(IntentState::Failed).unwrap();
        assert!(!store.write(&key, Some(0), rival).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), v1);
    }

    #[tokio::test]
    async fn malformed_writes_are_errors() {
        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        let v0 = IntentData::submitted(intent("other"));
        assert!(matches!(
            store.write(&key, None, v0).await,
            Err(StoreError::KeyMismatch { .. })
        ));

        let v0 = IntentData::submitted(intent("k"));
        assert!(matches!(
            store.write(&key, Some(3), v0).await,
            Err(StoreError::NonSequentialVersion { .. })
        ));
    }

    #[tokio::test]
    async fn change_stream_reports_each_write() {
        let store = InMemoryIntentStore::default();
        let mut rx = store.subscribe();
        let key = IntentKey::new("k");
        let v0 = IntentData::submitted(intent("k"));
        store.write(&key, None, v0.clone()).await.unwrap();
        store
            .write(&key, Some(0), v0.next(IntentState::Installing).unwrap())
            .await
            .unwrap();

        let mut versions = Vec::new();
        for _ in 0..2 {
            if let StoreEvent::Updated { data, .. } = rx.recv().await.unwrap() {
                versions.push(data.version());
            }
        }
        assert_eq!(versions, vec![0, 1]);
    }

    #[tokio::test]
    async fn promote_consumes_only_the_matching_request() {
        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        let first = IntentRequest::install(intent("k"));
        store.submit(first.clone()).await.unwrap();

        let newer = IntentRequest::withdraw(key.clone());
        store.submit(newer.clone()).await.unwrap();

        let data = IntentData::promote(None, &first).unwrap();
        assert!(store.promote(&key, None, data, &first).await.unwrap());
        assert_eq!(store.pending(&key).await, Some(newer));
    }

    #[tokio::test]
    async fn discard_keeps_newer_request() {
        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        let stale = IntentRequest::withdraw(key.clone());
        store.submit(stale.clone()).await.unwrap();
        assert!(store.discard_pending(&key, &stale).await);
        assert!(store.pending(&key).await.is_none());

        let newer = IntentRequest::install(intent("k"));
        store.submit(newer.clone()).await.unwrap();
        assert!(!store.discard_pending(&key, &stale).await);
        assert_eq!(store.pending(&key).await, Some(newer));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intents.json");

        let store = InMemoryIntentStore::default();
        let key = IntentKey::new("k");
        store.write(&key, None, IntentData::submitted(intent("k"))).await.unwrap();
        store.submit(IntentRequest::withdraw(key.clone())).await.unwrap();
        store.save(&path).unwrap();

        let restored = InMemoryIntentStore::load(&path, 16).unwrap();
        assert_eq!(restored.len().await, 1);
        assert!(restored.pending(&key).await.is_some());
        assert_eq!(restored.keys().await, vec![key]);
    }

    proptest! {
        #[test]
        fn accepted_versions_have_no_gaps(attempts in proptest::collection::vec(0u64..6, 1..40)) {
            let store = InMemoryIntentStore::new(64);
            let mut rx = store.subscribe();
            let key = IntentKey::new("k");
            let mut latest = IntentData::submitted(intent("k"));
            store.cas(&key, None, latest.clone(), None).unwrap();

            for expected in attempts {
                // Mostly-stale writers; only the one matching the stored version lands.
                let candidate = latest
                    .next(IntentState::Failed)
                    .or_else(|_| latest.next(IntentState::InstallReq))
                    .unwrap();
                if store.cas(&key, Some(expected), candidate.clone(), None).unwrap_or(false) {
                    latest = candidate;
                }
            }

            let mut seen = Vec::new();
            while let Ok(StoreEvent::Updated { data, .. }) = rx.try_recv() {
                seen.push(data.version());
            }
            prop_assert_eq!(seen, (0..=latest.version()).collect::<Vec<_>>());
        }
    }
}
