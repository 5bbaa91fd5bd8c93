//! 流水线错误类型与恢复动作
//!
//! 阶段执行器用 `?` 传播 PipelineError，由 RecoveryEngine 按所处阶段映射为 Abort / Fail / 重试。

use thiserror::Error;

use crate::core::state::Stage;
use crate::store::StoreError;
use crate::tools::GatewayError;

/// 编排过程中可能出现的错误（校验、策略、工具、并发、回调等）
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Policy rejection by {rule}: {detail}")]
    PolicyRejection { rule: String, detail: String },

    #[error("Tool '{tool}' failed: {detail}")]
    ToolExhausted { tool: String, detail: String },

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    #[error("Stale callback: {0}")]
    StaleCallback(String),

    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Lease held for {0}")]
    LeaseHeld(String),

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dispatcher closed")]
    DispatcherClosed,
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            StoreError::VersionConflict {
                id,
                expected,
                actual,
            } => PipelineError::VersionConflict {
                id,
                expected,
                actual,
            },
            other => PipelineError::Store(other.to_string()),
        }
    }
}

impl From<GatewayError> for PipelineError {
    fn from(err: GatewayError) -> Self {
        PipelineError::ToolExhausted {
            tool: err.tool().to_string(),
            detail: err.to_string(),
        }
    }
}

/// 恢复引擎给出的处理动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 重新加载最新状态后再执行（版本冲突）
    ReloadAndRetry,
    /// 资金承诺前的失败：干净终止
    Abort(String),
    /// 资金承诺后的失败：需要人工处理
    Fail(String),
    /// 丢弃（陈旧回调），不改动状态
    Discard(String),
}
