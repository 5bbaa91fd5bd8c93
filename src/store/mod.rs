//! 请求状态存储抽象层
//!
//! 统一的 StateStore 接口（乐观并发：save 必须携带期望版本），提供内存与 SQLite 两种实现。

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StoreSection;
use crate::core::state::RequestState;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Request already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// 请求状态存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 新建请求；同 ID 已存在时返回 AlreadyExists（入站去重依赖于此）
    async fn create(&self, state: RequestState) -> Result<RequestState, StoreError>;

    async fn load(&self, id: &str) -> Result<RequestState, StoreError>;

    /// 以期望版本写入，成功后返回版本号 +1 的新状态
    async fn save(&self, state: RequestState, expected_version: u64) -> Result<RequestState, StoreError>;

    /// 按挂起令牌查找请求
    async fn find_suspended(&self, token: &str) -> Result<RequestState, StoreError>;

    /// 所有处于挂起状态的请求（过期扫描用）
    async fn list_suspended(&self) -> Result<Vec<RequestState>, StoreError>;
}

/// 根据 [store] 配置创建存储：配置了 sqlite_path 时使用 SQLite，否则使用内存
pub fn open_store(section: &StoreSection) -> Result<Arc<dyn StateStore>, StoreError> {
    match &section.sqlite_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using sqlite state store");
            Ok(Arc::new(SqliteStateStore::open(path)?))
        }
        None => {
            tracing::info!("using in-memory state store");
            Ok(Arc::new(MemoryStateStore::new()))
        }
    }
}
