//! 错误恢复引擎
//!
//! 根据 PipelineError 与出错阶段返回 RecoveryAction：资金承诺前一律 Abort，承诺后一律 Fail，
//! 版本冲突交给驱动循环重新加载，陈旧回调直接丢弃。

use crate::core::state::Stage;
use crate::core::{PipelineError, RecoveryAction};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, stage: Stage, err: &PipelineError) -> RecoveryAction {
        let reason = match err {
            PipelineError::VersionConflict { .. } => return RecoveryAction::ReloadAndRetry,
            PipelineError::StaleCallback(msg) => return RecoveryAction::Discard(msg.clone()),
            PipelineError::Validation(reason) => reason.clone(),
            PipelineError::PolicyRejection { .. } => "policy_rejected".to_string(),
            PipelineError::ToolExhausted { tool, .. } => format!("tool_exhausted:{tool}"),
            PipelineError::IllegalTransition { .. } => "illegal_transition".to_string(),
            _ => "internal_error".to_string(),
        };
        if stage.is_committed() {
            RecoveryAction::Fail(reason)
        } else {
            RecoveryAction::Abort(reason)
        }
    }
}
