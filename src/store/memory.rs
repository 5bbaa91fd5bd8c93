//! 内存状态存储（测试与演示用）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{StateStore, StoreError};
use crate::core::state::RequestState;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, RequestState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self, mut state: RequestState) -> Result<RequestState, StoreError> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.id) {
            return Err(StoreError::AlreadyExists(state.id));
        }
        state.version = 1;
        states.insert(state.id.clone(), state.clone());
        Ok(state)
    }

    async fn load(&self, id: &str) -> Result<RequestState, StoreError> {
        self.states
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, mut state: RequestState, expected_version: u64) -> Result<RequestState, StoreError> {
        let mut states = self.states.write().await;
        let current = states
            .get(&state.id)
            .ok_or_else(|| StoreError::NotFound(state.id.clone()))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: state.id,
                expected: expected_version,
                actual: current.version,
            });
        }
        state.version = expected_version + 1;
        state.updated_at = Utc::now();
        states.insert(state.id.clone(), state.clone());
        Ok(state)
    }

    async fn find_suspended(&self, token: &str) -> Result<RequestState, StoreError> {
        self.states
            .read()
            .await
            .values()
            .find(|s| s.suspend_token.as_deref() == Some(token))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(token.to_string()))
    }

    async fn list_suspended(&self) -> Result<Vec<RequestState>, StoreError> {
        let mut suspended: Vec<RequestState> = self
            .states
            .read()
            .await
            .values()
            .filter(|s| s.is_suspended())
            .cloned()
            .collect();
        suspended.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let store = MemoryStateStore::new();
        let created = store.create(RequestState::new("r1", "s", "pots")).await.unwrap();
        assert_eq!(created.version, 1);
        let err = store.create(RequestState::new("r1", "s", "pots")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_conflict() {
        let store = MemoryStateStore::new();
        let created = store.create(RequestState::new("r1", "s", "pots")).await.unwrap();
        let saved = store.save(created.clone(), 1).await.unwrap();
        assert_eq!(saved.version, 2);
        let err = store.save(created, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict { expected: 1, actual: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_find_suspended_by_token() {
        let store = MemoryStateStore::new();
        let mut state = store.create(RequestState::new("r1", "s", "pots")).await.unwrap();
        state.suspend_token = Some("tok-1".to_string());
        store.save(state, 1).await.unwrap();
        let found = store.find_suspended("tok-1").await.unwrap();
        assert_eq!(found.id, "r1");
        assert!(matches!(store.find_suspended("nope").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.list_suspended().await.unwrap().len(), 1);
    }
}
