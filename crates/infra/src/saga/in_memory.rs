use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use docproc_core::ProcessId;
use docproc_events::SagaState;

use super::{SagaStore, SagaStoreError};

/// In-memory saga store. Instances do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    instances: RwLock<HashMap<ProcessId, SagaState>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> SagaStoreError {
    SagaStoreError::Backend("in-memory saga store lock poisoned".to_string())
}

#[async_trait::async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, correlation_id: ProcessId) -> Result<Option<SagaState>, SagaStoreError> {
        let map = self.instances.read().map_err(|_| poisoned())?;
        Ok(map.get(&correlation_id).cloned())
    }

    async fn insert(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let mut map = self.instances.write().map_err(|_| poisoned())?;
        if map.contains_key(&state.correlation_id) {
            return Err(SagaStoreError::AlreadyExists(state.correlation_id));
        }
        map.insert(state.correlation_id, state.clone());
        Ok(())
    }

    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let mut map = self.instances.write().map_err(|_| poisoned())?;
        match map.get_mut(&state.correlation_id) {
            Some(slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(SagaStoreError::NotFound(state.correlation_id)),
        }
    }

    async fn remove(&self, correlation_id: ProcessId) -> Result<bool, SagaStoreError> {
        let mut map = self.instances.write().map_err(|_| poisoned())?;
        Ok(map.remove(&correlation_id).is_some())
    }

    async fn purge_finalized(&self, before: DateTime<Utc>) -> Result<usize, SagaStoreError> {
        let mut map = self.instances.write().map_err(|_| poisoned())?;
        let len = map.len();
        map.retain(|_, s| !(s.is_finalized() && s.updated_at < before));
        Ok(len - map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use docproc_events::SagaPhase;

    #[tokio::test]
    async fn insert_rejects_existing_key() {
        let store = InMemorySagaStore::new();
        let s = SagaState::new(ProcessId::new(), 1, Utc::now());
        store.insert(&s).await.unwrap();
        assert_eq!(store.insert(&s).await, Err(SagaStoreError::AlreadyExists(s.correlation_id)));
    }

    #[tokio::test]
    async fn save_requires_existing_key() {
        let store = InMemorySagaStore::new();
        let s = SagaState::new(ProcessId::new(), 1, Utc::now());
        assert_eq!(store.save(&s).await, Err(SagaStoreError::NotFound(s.correlation_id)));
    }

    #[tokio::test]
    async fn purges_only_old_finalized_instances() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        let live = SagaState::new(ProcessId::new(), 1, now - TimeDelta::hours(2));
        let mut old_done = SagaState::new(ProcessId::new(), 1, now - TimeDelta::hours(2));
        old_done.current_state = SagaPhase::Completed;
        let mut fresh_done = SagaState::new(ProcessId::new(), 1, now);
        fresh_done.current_state = SagaPhase::Completed;

        for s in [&live, &old_done, &fresh_done] {
            store.insert(s).await.unwrap();
        }

        let purged = store.purge_finalized(now - TimeDelta::hours(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.load(old_done.correlation_id).await.unwrap().is_none());
        assert!(store.load(live.correlation_id).await.unwrap().is_some());
        assert_eq!(store.len(), 2);
    }
}
