//! 审计记录：每个请求的转移、规则评估与回调处理的只追加历史
//!
//! 每条记录同时以 JSON 形式写一行 tracing 日志（`event = "request_audit"`），便于离线回放。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::state::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Created,
    Duplicate,
    Throttled,
    Transition,
    RuleEvaluation,
    StaleCallback,
    VersionConflict,
    Resumed,
    Expired,
    LeaseContended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub stage: Option<Stage>,
    pub detail: Value,
}

impl AuditRecord {
    pub fn new(request_id: impl Into<String>, kind: AuditKind, stage: Option<Stage>, detail: Value) -> Self {
        Self {
            request_id: request_id.into(),
            at: Utc::now(),
            kind,
            stage,
            detail,
        }
    }
}

/// 审计输出端
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);

    /// 按写入顺序返回某请求的全部记录
    async fn history(&self, request_id: &str) -> Vec<AuditRecord>;
}

/// 进程内审计：按请求分组保存，并输出一行 JSON 日志
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: RwLock<HashMap<String, Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        let line = serde_json::json!({
            "event": "request_audit",
            "request_id": record.request_id,
            "kind": record.kind,
            "stage": record.stage,
            "detail": record.detail,
        });
        tracing::info!(audit = %line, "audit");
        self.records
            .write()
            .await
            .entry(record.request_id.clone())
            .or_default()
            .push(record);
    }

    async fn history(&self, request_id: &str) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }
}
