//! 外部工具注册表
//!
//! 所有外部协作方（LLM 决策、地理聚类、报价、语音议价、通知、支付、物流、账本、信誉、违约登记）
//! 都实现 ExternalTool trait，由 ToolRegistry 按名注册；阶段代码只通过 ToolGateway 调用它们。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 工具类别：决定重试策略与超时
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// LLM 结构化决策
    Decision,
    /// 只读查询（聚类、报价、信誉、违约）
    Lookup,
    /// 通知与语音外呼
    Messaging,
    Payment,
    Shipping,
    /// 账本与信誉写入
    Ledger,
}

/// 单次工具调用
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub tool: String,
    pub payload: Value,
    /// 同一逻辑操作的所有重试共用同一个键
    pub idempotency_key: String,
    /// 从 1 开始
    pub attempt: u32,
}

/// 工具单次调用失败的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("timed out")]
    Timeout,

    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ToolError {
    /// 超时、限流、5xx 与 408 可重试；其余视为永久拒绝
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Timeout | ToolError::RateLimited { .. } => true,
            ToolError::Remote { code, .. } => *code >= 500 || *code == 408,
            ToolError::InvalidPayload(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Timeout => "timeout",
            ToolError::Remote { .. } => "remote",
            ToolError::RateLimited { .. } => "rate_limited",
            ToolError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// 外部工具 trait：名称、类别、异步调用（payload 为 JSON）
#[async_trait]
pub trait ExternalTool: Send + Sync {
    fn name(&self) -> &str;

    fn class(&self) -> ToolClass;

    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn ExternalTool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ExternalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl ExternalTool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 注册共享实例（测试中需要保留句柄检查调用记录时使用）；同名覆盖
    pub fn register_arc(&mut self, tool: Arc<dyn ExternalTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExternalTool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ExternalTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn class(&self) -> ToolClass {
            ToolClass::Lookup
        }

        async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
            Ok(call.payload.clone())
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Echo);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.tool_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ToolError::Timeout.is_retryable());
        assert!(ToolError::RateLimited { retry_after_ms: 10 }.is_retryable());
        assert!(ToolError::Remote { code: 503, message: String::new() }.is_retryable());
        assert!(ToolError::Remote { code: 408, message: String::new() }.is_retryable());
        assert!(!ToolError::Remote { code: 400, message: String::new() }.is_retryable());
        assert!(!ToolError::InvalidPayload("bad".to_string()).is_retryable());
    }
}
