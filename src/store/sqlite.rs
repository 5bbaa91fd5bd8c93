//! SQLite 状态存储
//!
//! 整个 RequestState 以 JSON 存入 payload 列，version / stage / suspend_token 单独成列用于
//! 条件更新与索引查找。rusqlite 为同步接口，所有访问经 spawn_blocking 执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{StateStore, StoreError};
use crate::core::state::RequestState;

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS request_states (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                stage TEXT NOT NULL,
                suspend_token TEXT,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_request_states_token ON request_states(suspend_token);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

fn decode(payload: String) -> Result<RequestState, StoreError> {
    Ok(serde_json::from_str(&payload)?)
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create(&self, mut state: RequestState) -> Result<RequestState, StoreError> {
        state.version = 1;
        let payload = serde_json::to_string(&state)?;
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO request_states (id, version, stage, suspend_token, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    state.id,
                    state.version as i64,
                    state.stage.as_str(),
                    state.suspend_token,
                    payload,
                    state.updated_at.to_rfc3339(),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(state.id));
            }
            Ok(state)
        })
        .await
    }

    async fn load(&self, id: &str) -> Result<RequestState, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM request_states WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            payload.map(decode).unwrap_or(Err(StoreError::NotFound(id)))
        })
        .await
    }

    async fn save(&self, mut state: RequestState, expected_version: u64) -> Result<RequestState, StoreError> {
        state.version = expected_version + 1;
        state.updated_at = Utc::now();
        let payload = serde_json::to_string(&state)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE request_states
                 SET version = ?1, stage = ?2, suspend_token = ?3, payload = ?4, updated_at = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    state.version as i64,
                    state.stage.as_str(),
                    state.suspend_token,
                    payload,
                    state.updated_at.to_rfc3339(),
                    state.id,
                    expected_version as i64,
                ],
            )?;
            if updated == 0 {
                let actual: Option<i64> = tx
                    .query_row(
                        "SELECT version FROM request_states WHERE id = ?1",
                        params![state.id],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Err(match actual {
                    Some(actual) => StoreError::VersionConflict {
                        id: state.id,
                        expected: expected_version,
                        actual: actual as u64,
                    },
                    None => StoreError::NotFound(state.id),
                });
            }
            tx.commit()?;
            Ok(state)
        })
        .await
    }

    async fn find_suspended(&self, token: &str) -> Result<RequestState, StoreError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM request_states WHERE suspend_token = ?1",
                    params![token],
                    |row| row.get(0),
                )
                .optional()?;
            payload.map(decode).unwrap_or(Err(StoreError::NotFound(token)))
        })
        .await
    }

    async fn list_suspended(&self) -> Result<Vec<RequestState>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM request_states WHERE suspend_token IS NOT NULL ORDER BY updated_at",
            )?;
            let payloads = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            payloads.into_iter().map(decode).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Stage;

    #[tokio::test]
    async fn test_sqlite_create_load_roundtrip() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let mut state = RequestState::new("r1", "+91000", "need 50 clay pots");
        state.raw_input = "need 50 clay pots in Jaipur".to_string();
        store.create(state).await.unwrap();
        let loaded = store.load("r1").await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.raw_input, "need 50 clay pots in Jaipur");
        assert!(matches!(store.load("missing").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_conditional_update() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let created = store.create(RequestState::new("r1", "s", "pots")).await.unwrap();
        let mut next = created.clone();
        next.stage = Stage::Cluster;
        let saved = store.save(next, 1).await.unwrap();
        assert_eq!(saved.version, 2);

        let err = store.save(created, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { actual: 2, .. }));
        assert_eq!(store.load("r1").await.unwrap().stage, Stage::Cluster);

        let ghost = RequestState::new("ghost", "s", "x");
        assert!(matches!(store.save(ghost, 1).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_suspended_index() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let mut state = store.create(RequestState::new("r1", "s", "pots")).await.unwrap();
        state.suspend_token = Some("pay-abc".to_string());
        store.save(state, 1).await.unwrap();
        store.create(RequestState::new("r2", "s", "pots")).await.unwrap();

        assert_eq!(store.find_suspended("pay-abc").await.unwrap().id, "r1");
        let suspended = store.list_suspended().await.unwrap();
        assert_eq!(suspended.len(), 1);
    }
}
